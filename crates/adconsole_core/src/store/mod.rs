//! In-memory item graph: scope nodes, results rows and their buddy links.
//!
//! # Responsibility
//! - Own every scope node and results row shown by the browser.
//! - Gate inserts on fetch state so lazily loaded listings never receive
//!   orphan or duplicate items.
//!
//! # Invariants
//! - The controller is the only writer.
//! - External layers hold ids, never references, across mutations.

pub mod events;
pub mod item_store;

pub use events::StoreEvent;
pub use item_store::{ItemStore, Placement, PlannedItem, StoreError, StoreResult};
