//! Dual-view hierarchical browser engine for a directory management console.
//! This crate owns the item store and every rule about what the scope tree
//! and the results listings show.

pub mod behavior;
pub mod config;
pub mod db;
pub mod directory;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use behavior::{
    Activation, BehaviorContext, BehaviorRegistry, CustomAction, DropAction, DropOutcome,
    NodeBehavior, RegistryError, StandardAction,
};
pub use config::{BrowserSettings, ConfigError, DirectorySchema};
pub use directory::{
    search_all_pages, DirectoryError, DirectoryResult, DirectoryService, NewObjectKind,
    SearchRequest, SearchScope, SqliteDirectory,
};
pub use logging::{default_log_level, init_logging, log_session_settings, logging_status};
pub use model::entry::Entry;
pub use model::node::{FetchState, ItemData, ItemId, NodeId, NodeType, Role, RowId, Value};
pub use service::{
    BrowserController, ConsoleError, ConsoleEvent, ConsoleResult, DropPhase, DropReport,
    UserInput, ViewHandle, ViewUpdate,
};
pub use store::{ItemStore, Placement, PlannedItem, StoreError, StoreEvent};

