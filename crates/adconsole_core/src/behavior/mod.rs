//! Per-type node behaviors.
//!
//! # Responsibility
//! - Define the capability set every node type implements: fetch, drop,
//!   context actions, activation and column layout.
//! - Provide the read-only context behaviors run in.
//!
//! # Invariants
//! - Behaviors hold no per-node state; everything a call needs comes from
//!   the node attributes and the [`BehaviorContext`].
//! - Behaviors never mutate the item store. They return planned items and
//!   [`StorePatch`] lists that the caller applies.

use crate::config::BrowserSettings;
use crate::directory::{DirectoryResult, DirectoryService};
use crate::model::entry::Entry;
use crate::model::node::{ItemData, ItemId, Node, NodeId, NodeType, Role, Value};
use crate::store::{ItemStore, PlannedItem};
use std::collections::BTreeSet;

pub mod all_policies;
pub mod object;
pub mod policy;
pub mod policy_container;
pub mod policy_ou;
pub mod registry;

pub use registry::{BehaviorRegistry, RegistryError};

/// Read-only collaborators handed to every behavior call.
pub struct BehaviorContext<'a> {
    pub directory: &'a dyn DirectoryService,
    pub settings: &'a BrowserSettings,
    pub store: &'a ItemStore,
}

impl BehaviorContext<'_> {
    /// Returns the object classes recorded on an item.
    pub fn classes_of(&self, item: ItemId) -> BTreeSet<String> {
        match self.store.attribute(item, Role::ObjectClasses) {
            Some(Value::List(values)) => values.iter().cloned().collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Returns whether an item stands for the domain head object.
    pub fn is_domain_head(&self, item: ItemId) -> bool {
        self.store
            .source_key(item)
            .is_some_and(|key| key.eq_ignore_ascii_case(self.settings.domain_head.trim()))
    }
}

/// Actions every type may expose in its context menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StandardAction {
    Properties,
    Rename,
    Delete,
    Refresh,
}

/// Type-specific context actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionId {
    NewUser,
    NewComputer,
    NewOu,
    NewGroup,
    AddToGroup,
    EnableAccount,
    DisableAccount,
    ResetPassword,
    Find,
    CreatePolicy,
    CreateAndLinkPolicy,
    LinkPolicy,
    AddLink,
    BlockInheritance,
    FindPolicy,
}

/// One context action with its menu label and check state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAction {
    pub id: ActionId,
    pub label: &'static str,
    /// `Some` for checkable actions.
    pub checked: Option<bool>,
}

impl CustomAction {
    pub fn new(id: ActionId, label: &'static str) -> Self {
        Self {
            id,
            label,
            checked: None,
        }
    }

    pub fn checkable(id: ActionId, label: &'static str, checked: bool) -> Self {
        Self {
            id,
            label,
            checked: Some(checked),
        }
    }
}

/// What double-clicking an item does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Make the node the current scope.
    NavigateInto(NodeId),
    /// Open the properties editor for the item.
    Properties(ItemId),
}

/// Concrete action derived for one dragged item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropAction {
    Move,
    AddMembership,
    LinkPolicy,
    None,
}

/// Result of executing one dragged item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    Applied,
    /// No valid action for this pair; nothing was changed.
    Rejected(String),
    /// The directory refused the mutation.
    Failed(String),
}

/// Per-item drop result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropItemResult {
    pub item: ItemId,
    pub source_key: Option<String>,
    pub action: DropAction,
    pub outcome: DropOutcome,
}

impl DropItemResult {
    pub fn applied(&self) -> bool {
        self.outcome == DropOutcome::Applied
    }
}

/// Store change requested by a behavior after a directory mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StorePatch {
    /// Insert under `parent` if it is already fetched.
    Insert {
        parent: NodeId,
        items: Vec<PlannedItem>,
    },
    /// Remove an item and its buddy.
    Remove(ItemId),
    /// Replace display data of an item and its buddy.
    Update { item: ItemId, data: ItemData },
    /// Discard children and refetch on next expand.
    Refresh(NodeId),
}

/// Output of a behavior's drop: per-item results plus ordered store patches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DropExecution {
    pub results: Vec<DropItemResult>,
    pub patches: Vec<StorePatch>,
}

/// A proposed drop: dragged items onto one target.
#[derive(Debug, Clone, Copy)]
pub struct DropRequest<'a> {
    pub dragged: &'a [ItemId],
    pub dragged_types: &'a BTreeSet<NodeType>,
    pub target: ItemId,
    pub target_type: NodeType,
}

/// Behavior shared by every node of one type.
pub trait NodeBehavior: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Builds display data for one entry of this type.
    fn item_data(&self, ctx: &BehaviorContext<'_>, entry: &Entry) -> ItemData;

    /// Turns entries found under `parent` into planned children.
    fn plan_children(
        &self,
        ctx: &BehaviorContext<'_>,
        parent: &Node,
        entries: Vec<Entry>,
    ) -> Vec<PlannedItem>;

    /// Loads the children of `node`. Nothing is inserted on error.
    fn fetch(&self, ctx: &BehaviorContext<'_>, node: &Node) -> DirectoryResult<Vec<PlannedItem>>;

    fn can_drop(&self, _ctx: &BehaviorContext<'_>, _request: &DropRequest<'_>) -> bool {
        false
    }

    /// Executes a validated drop onto a node of this type.
    fn execute_drop(
        &self,
        _ctx: &BehaviorContext<'_>,
        request: &DropRequest<'_>,
    ) -> DropExecution {
        DropExecution {
            results: request
                .dragged
                .iter()
                .map(|item| DropItemResult {
                    item: *item,
                    source_key: None,
                    action: DropAction::None,
                    outcome: DropOutcome::Rejected(format!(
                        "{} does not accept drops",
                        request.target_type
                    )),
                })
                .collect(),
            patches: Vec::new(),
        }
    }

    fn custom_actions(&self, ctx: &BehaviorContext<'_>, selection: &[ItemId]) -> Vec<CustomAction>;

    fn standard_actions(
        &self,
        ctx: &BehaviorContext<'_>,
        selection: &[ItemId],
    ) -> BTreeSet<StandardAction>;

    fn column_labels(&self) -> Vec<&'static str> {
        vec!["Name"]
    }

    fn default_columns(&self) -> Vec<usize> {
        vec![0]
    }

    /// Rows with a scope node navigate into it; everything else opens properties.
    fn activation(&self, ctx: &BehaviorContext<'_>, item: ItemId) -> Activation {
        match (item, ctx.store.scope_node_of(item)) {
            (ItemId::Row(_), Some(node)) => Activation::NavigateInto(node),
            _ => Activation::Properties(item),
        }
    }
}

/// Returns `Refresh` when every selected item is a fetched scope node.
pub(crate) fn refresh_if_fetched(ctx: &BehaviorContext<'_>, selection: &[ItemId]) -> bool {
    !selection.is_empty()
        && selection.iter().all(|item| {
            item.as_node()
                .and_then(|id| ctx.store.node(id))
                .is_some_and(Node::was_fetched)
        })
}

/// Object classes of an entry as an attribute value.
pub(crate) fn classes_value(entry: &Entry) -> Value {
    Value::List(entry.object_classes.iter().cloned().collect())
}
