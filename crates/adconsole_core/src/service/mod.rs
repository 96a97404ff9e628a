//! Browser use-case services.
//!
//! # Responsibility
//! - Orchestrate behaviors, the item store and the directory service into
//!   the operations a console front end calls.
//! - Keep presentation layers decoupled from store internals.

pub mod controller;
pub mod drop_coordinator;
pub mod view_sync;

pub use controller::{ActionSet, BrowserController, ConsoleError, ConsoleEvent, ConsoleResult};
pub use drop_coordinator::{DropCoordinator, DropGesture, DropPhase, DropReport};
pub use view_sync::{
    ResultsViewId, ResultsViewSpec, UserInput, ViewCommand, ViewHandle, ViewSync, ViewUpdate,
};
