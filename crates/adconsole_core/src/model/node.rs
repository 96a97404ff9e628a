//! Scope node and results row read models.
//!
//! # Responsibility
//! - Define identities, type tags and per-item data for the item graph store.
//!
//! # Invariants
//! - Node and row ids are random v4 UUIDs and are never reused.
//! - `fetch_state` advances `NotFetched -> Fetching -> Fetched`; only an
//!   explicit refresh or an aborted fetch moves it back to `NotFetched`.
//! - A buddy link is a back-reference by id, never an ownership edge.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable scope node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Uuid);

impl NodeId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Stable results row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(Uuid);

impl RowId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "row:{}", self.0)
    }
}

/// Identity of anything a view can show: a scope node or a results row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemId {
    Node(NodeId),
    Row(RowId),
}

impl ItemId {
    pub fn as_node(self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Row(_) => None,
        }
    }

    pub fn as_row(self) -> Option<RowId> {
        match self {
            Self::Node(_) => None,
            Self::Row(id) => Some(id),
        }
    }
}

impl From<NodeId> for ItemId {
    fn from(value: NodeId) -> Self {
        Self::Node(value)
    }
}

impl From<RowId> for ItemId {
    fn from(value: RowId) -> Self {
        Self::Row(value)
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{id}"),
            Self::Row(id) => write!(f, "{id}"),
        }
    }
}

/// Type tag selecting the behavior of a node or row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    /// Ordinary directory object (domain, OU, container, user, group ...).
    DomainObject,
    /// "Group Policy Objects" root of the policy tree.
    PolicyContainer,
    /// One group policy object.
    Policy,
    /// Domain or OU shown inside the policy tree.
    PolicyOrgUnit,
    /// "All policies" folder listing every policy object.
    SyntheticFolder,
}

impl NodeType {
    /// Stable string id used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DomainObject => "domain_object",
            Self::PolicyContainer => "policy_container",
            Self::Policy => "policy",
            Self::PolicyOrgUnit => "policy_ou",
            Self::SyntheticFolder => "synthetic_folder",
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lazy loading state of a scope node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    NotFetched,
    Fetching,
    Fetched,
}

impl Display for FetchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::NotFetched => "not_fetched",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
        };
        f.write_str(value)
    }
}

/// Key of one type-specific attribute stored on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Source key (DN). Resolved from `source_key`, never stored in `attributes`.
    Dn,
    ObjectClasses,
    AccountDisabled,
    InheritanceBlocked,
    EnforcedPolicies,
    DisabledPolicies,
    Description,
}

/// Value of one type-specific attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    /// Case-insensitive equality for text values, exact equality otherwise.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a.eq_ignore_ascii_case(b),
            (Self::List(values), Self::Text(b)) => {
                values.iter().any(|value| value.eq_ignore_ascii_case(b))
            }
            (a, b) => a == b,
        }
    }
}

/// Display data shared by a node and its buddy row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemData {
    /// Directory identity. `None` for synthetic items.
    pub source_key: Option<String>,
    pub display_name: String,
    /// Results columns, in the order of the owning view's labels.
    pub columns: Vec<String>,
    pub attributes: BTreeMap<Role, Value>,
}

impl ItemData {
    /// Creates data for a synthetic item with no directory identity.
    pub fn synthetic(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            source_key: None,
            columns: vec![display_name.clone()],
            display_name,
            attributes: BTreeMap::new(),
        }
    }
}

/// Vertex of the scope tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    /// `None` only for roots.
    pub parent_id: Option<NodeId>,
    pub fetch_state: FetchState,
    /// Explicit ordering bucket; lower sorts first.
    pub sort_index: i64,
    pub source_key: Option<String>,
    pub display_name: String,
    pub attributes: BTreeMap<Role, Value>,
    /// Child scope nodes in display order.
    pub children: Vec<NodeId>,
    /// Results rows owned by this node in display order.
    pub rows: Vec<RowId>,
    /// Row in the parent's listing that mirrors this node.
    pub buddy_row: Option<RowId>,
}

impl Node {
    pub fn was_fetched(&self) -> bool {
        self.fetch_state == FetchState::Fetched
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn attribute(&self, role: Role) -> Option<&Value> {
        self.attributes.get(&role)
    }
}

/// One row of a flat results listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsRow {
    pub id: RowId,
    pub node_type: NodeType,
    /// Scope node owning the listing this row belongs to.
    pub parent_id: NodeId,
    /// Ordering bucket, copied from the buddy node when there is one.
    pub sort_index: i64,
    pub source_key: Option<String>,
    pub display_name: String,
    pub columns: Vec<String>,
    pub attributes: BTreeMap<Role, Value>,
    /// Scope node under the same parent that mirrors this row.
    pub buddy_node: Option<NodeId>,
}

impl ResultsRow {
    pub fn attribute(&self, role: Role) -> Option<&Value> {
        self.attributes.get(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemId, NodeId, RowId, Value};

    #[test]
    fn ids_are_unique_and_convert() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
        assert_eq!(ItemId::from(a).as_node(), Some(a));
        assert_eq!(ItemId::from(RowId::generate()).as_node(), None);
    }

    #[test]
    fn value_matches_text_case_insensitively() {
        let value = Value::Text("OU=A,DC=x".to_string());
        assert!(value.matches(&Value::Text("ou=a,dc=x".to_string())));
        let list = Value::List(vec!["CN=p,DC=x".to_string()]);
        assert!(list.matches(&Value::Text("cn=P,dc=X".to_string())));
        assert!(!Value::Bool(true).matches(&Value::Bool(false)));
    }
}
