//! Domain model shared by every browser layer.
//!
//! # Responsibility
//! - Define directory entry snapshots and the helpers that interpret them.
//! - Define scope node / results row identities and per-item data.
//!
//! # Invariants
//! - Entries are read-only snapshots produced by a directory service.
//! - Nodes and rows are identified by stable ids that are never reused.

pub mod dn;
pub mod entry;
pub mod gplink;
pub mod node;
