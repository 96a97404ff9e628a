//! Mutation events emitted by the item store.

use crate::model::node::{FetchState, ItemId, NodeId};

/// One structural or data change inside the item store.
///
/// Events are queued in mutation order and drained by the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A node or row was added under `parent` (`None` for roots).
    Inserted {
        item: ItemId,
        parent: Option<NodeId>,
    },
    /// Display data or attributes of an item changed.
    Updated { item: ItemId },
    /// An item was removed. Emitted for every removed descendant too.
    Removed {
        item: ItemId,
        parent: Option<NodeId>,
    },
    /// Children and rows of `node` were reordered.
    Resorted { node: NodeId },
    FetchStateChanged { node: NodeId, state: FetchState },
}

impl StoreEvent {
    /// Returns the item this event is about.
    pub fn item(&self) -> ItemId {
        match self {
            Self::Inserted { item, .. } | Self::Updated { item } | Self::Removed { item, .. } => {
                *item
            }
            Self::Resorted { node } | Self::FetchStateChanged { node, .. } => ItemId::Node(*node),
        }
    }
}
