//! Item store to view mapping.
//!
//! # Responsibility
//! - Hand out stable view handles for store items and translate store events
//!   into view updates.
//! - Translate user input on view handles back into store identifiers.
//!
//! # Invariants
//! - A handle maps to exactly one live item; removed items lose their handle
//!   and input on a stale handle is dropped.
//! - The results view of a node is chosen by its node type.

use crate::model::node::{FetchState, ItemId, NodeId, NodeType};
use crate::store::StoreEvent;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

/// Stable view-side index of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewHandle(u64);

impl Display for ViewHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "view:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultsViewId(u32);

/// Column layout of one registered results view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsViewSpec {
    pub id: ResultsViewId,
    pub header_labels: Vec<String>,
    pub default_columns: Vec<usize>,
}

/// Change the presentation layer must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Inserted {
        handle: ViewHandle,
        parent: Option<ViewHandle>,
        item: ItemId,
    },
    Changed {
        handle: ViewHandle,
    },
    Removed {
        handle: ViewHandle,
    },
    Resorted {
        parent: ViewHandle,
    },
    FetchStateChanged {
        handle: ViewHandle,
        state: FetchState,
    },
}

/// Raw input from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Activated(ViewHandle),
    SelectionChanged(Vec<ViewHandle>),
    ExpandRequested(ViewHandle),
    ScopeSelected(ViewHandle),
    DropGesture {
        dragged: Vec<ViewHandle>,
        target: ViewHandle,
    },
}

/// Input resolved to store identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    Activate(ItemId),
    SetSelection(Vec<ItemId>),
    Expand(NodeId),
    SelectScope(NodeId),
    Drop { dragged: Vec<ItemId>, target: ItemId },
}

#[derive(Debug, Default)]
pub struct ViewSync {
    handles: HashMap<ItemId, ViewHandle>,
    items: HashMap<ViewHandle, ItemId>,
    next_handle: u64,
    results_views: BTreeMap<ResultsViewId, ResultsViewSpec>,
    views_by_type: HashMap<NodeType, ResultsViewId>,
    next_view: u32,
}

impl ViewSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a results view layout and returns its id.
    pub fn register_results_view(
        &mut self,
        header_labels: Vec<String>,
        default_columns: Vec<usize>,
    ) -> ResultsViewId {
        let id = ResultsViewId(self.next_view);
        self.next_view += 1;
        self.results_views.insert(
            id,
            ResultsViewSpec {
                id,
                header_labels,
                default_columns,
            },
        );
        id
    }

    /// Uses `view` for the listings of every node of `node_type`.
    pub fn assign_results_view(&mut self, node_type: NodeType, view: ResultsViewId) {
        self.views_by_type.insert(node_type, view);
    }

    pub fn results_view_for(&self, node_type: NodeType) -> Option<&ResultsViewSpec> {
        self.views_by_type
            .get(&node_type)
            .and_then(|id| self.results_views.get(id))
    }

    pub fn handle_of(&self, item: ItemId) -> Option<ViewHandle> {
        self.handles.get(&item).copied()
    }

    pub fn item_of(&self, handle: ViewHandle) -> Option<ItemId> {
        self.items.get(&handle).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Translates store events, in order, into view updates.
    pub fn apply(&mut self, events: Vec<StoreEvent>) -> Vec<ViewUpdate> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            match event {
                StoreEvent::Inserted { item, parent } => {
                    let handle = self.allocate(item);
                    let parent = parent.and_then(|node| self.handle_of(node.into()));
                    out.push(ViewUpdate::Inserted {
                        handle,
                        parent,
                        item,
                    });
                }
                StoreEvent::Updated { item } => {
                    if let Some(handle) = self.handle_of(item) {
                        out.push(ViewUpdate::Changed { handle });
                    }
                }
                StoreEvent::Removed { item, .. } => {
                    if let Some(handle) = self.handles.remove(&item) {
                        self.items.remove(&handle);
                        out.push(ViewUpdate::Removed { handle });
                    }
                }
                StoreEvent::Resorted { node } => {
                    if let Some(parent) = self.handle_of(node.into()) {
                        out.push(ViewUpdate::Resorted { parent });
                    }
                }
                StoreEvent::FetchStateChanged { node, state } => {
                    if let Some(handle) = self.handle_of(node.into()) {
                        out.push(ViewUpdate::FetchStateChanged { handle, state });
                    }
                }
            }
        }
        out
    }

    /// Resolves view input. Returns `None` when a handle is stale.
    pub fn translate(&self, input: UserInput) -> Option<ViewCommand> {
        let command = match input {
            UserInput::Activated(handle) => self.resolve(handle).map(ViewCommand::Activate),
            UserInput::SelectionChanged(handles) => Some(ViewCommand::SetSelection(
                handles
                    .into_iter()
                    .filter_map(|handle| self.resolve(handle))
                    .collect(),
            )),
            UserInput::ExpandRequested(handle) => self
                .resolve(handle)
                .and_then(ItemId::as_node)
                .map(ViewCommand::Expand),
            UserInput::ScopeSelected(handle) => self
                .resolve(handle)
                .and_then(ItemId::as_node)
                .map(ViewCommand::SelectScope),
            UserInput::DropGesture { dragged, target } => {
                let target = self.resolve(target)?;
                let dragged: Option<Vec<ItemId>> =
                    dragged.into_iter().map(|handle| self.resolve(handle)).collect();
                dragged.map(|dragged| ViewCommand::Drop { dragged, target })
            }
        };
        if command.is_none() {
            debug!("event=view_input module=view status=skip reason=stale_handle");
        }
        command
    }

    fn resolve(&self, handle: ViewHandle) -> Option<ItemId> {
        self.items.get(&handle).copied()
    }

    fn allocate(&mut self, item: ItemId) -> ViewHandle {
        if let Some(handle) = self.handles.get(&item) {
            return *handle;
        }
        let handle = ViewHandle(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(item, handle);
        self.items.insert(handle, item);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::{UserInput, ViewCommand, ViewSync, ViewUpdate};
    use crate::model::node::{ItemData, ItemId, NodeType};
    use crate::store::ItemStore;

    #[test]
    fn removed_items_lose_their_handle() {
        let mut store = ItemStore::new();
        let root = store.add_root(NodeType::DomainObject, ItemData::synthetic("root"), 0);
        let mut views = ViewSync::new();
        views.apply(store.drain_events());
        let handle = views.handle_of(ItemId::Node(root)).unwrap();

        store.delete_item(ItemId::Node(root)).unwrap();
        let updates = views.apply(store.drain_events());
        assert_eq!(updates, vec![ViewUpdate::Removed { handle }]);
        assert_eq!(views.translate(UserInput::Activated(handle)), None);
        assert!(views.is_empty());
    }

    #[test]
    fn expand_on_node_handle_resolves_to_node() {
        let mut store = ItemStore::new();
        let root = store.add_root(NodeType::DomainObject, ItemData::synthetic("root"), 0);
        let mut views = ViewSync::new();
        views.apply(store.drain_events());
        let handle = views.handle_of(root.into()).unwrap();
        assert_eq!(
            views.translate(UserInput::ExpandRequested(handle)),
            Some(ViewCommand::Expand(root))
        );
    }

    #[test]
    fn results_view_is_chosen_by_type() {
        let mut views = ViewSync::new();
        let id = views.register_results_view(vec!["Name".to_string()], vec![0]);
        views.assign_results_view(NodeType::Policy, id);
        assert_eq!(views.results_view_for(NodeType::Policy).map(|view| view.id), Some(id));
        assert!(views.results_view_for(NodeType::DomainObject).is_none());
    }
}
