//! Scope tree and results listings with buddy cross-links.
//!
//! # Responsibility
//! - Create, update, remove and reorder scope nodes and results rows.
//! - Drive the per-node fetch state machine and commit fetched children
//!   atomically.
//!
//! # Invariants
//! - Parent chains are acyclic and end at a root.
//! - A node and its buddy row share a parent, a source key and attributes;
//!   both are written in the same `update` call.
//! - Under one parent, at most one node and one row carry a given source key.
//! - Planned inserts only land under `Fetched` parents, or under the node
//!   whose fetch is being committed.

use crate::model::dn::dn_equals;
use crate::model::node::{
    FetchState, ItemData, ItemId, Node, NodeId, NodeType, ResultsRow, Role, RowId, Value,
};
use crate::store::events::StoreEvent;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from item store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NodeNotFound(NodeId),
    RowNotFound(RowId),
    /// Requested fetch state change is not allowed from the current state.
    InvalidFetchTransition {
        node: NodeId,
        from: FetchState,
        to: FetchState,
    },
    /// Structural check found an inconsistency.
    InvariantViolated(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "scope node not found: {id}"),
            Self::RowNotFound(id) => write!(f, "results row not found: {id}"),
            Self::InvalidFetchTransition { node, from, to } => {
                write!(f, "invalid fetch transition for {node}: {from} -> {to}")
            }
            Self::InvariantViolated(message) => write!(f, "store invariant violated: {message}"),
        }
    }
}

impl Error for StoreError {}

/// Where a planned item lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Tree only.
    ScopeOnly,
    /// Results listing only.
    ResultsOnly,
    /// Tree node plus buddy row.
    Buddy,
}

/// One child item produced by a behavior, not yet inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedItem {
    pub node_type: NodeType,
    pub data: ItemData,
    pub placement: Placement,
    pub sort_index: i64,
}

impl PlannedItem {
    pub fn new(node_type: NodeType, data: ItemData, placement: Placement) -> Self {
        Self {
            node_type,
            data,
            placement,
            sort_index: 0,
        }
    }

    pub fn with_sort_index(mut self, sort_index: i64) -> Self {
        self.sort_index = sort_index;
        self
    }
}

/// Owner of every scope node and results row.
#[derive(Debug, Default)]
pub struct ItemStore {
    nodes: HashMap<NodeId, Node>,
    rows: HashMap<RowId, ResultsRow>,
    roots: Vec<NodeId>,
    events: Vec<StoreEvent>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root node. Roots start `NotFetched`.
    pub fn add_root(&mut self, node_type: NodeType, data: ItemData, sort_index: i64) -> NodeId {
        let node = new_node(node_type, None, data, sort_index);
        let id = node.id;
        self.nodes.insert(id, node);
        self.roots.push(id);
        self.events.push(StoreEvent::Inserted {
            item: id.into(),
            parent: None,
        });
        id
    }

    /// Adds a `NotFetched` scope node under `parent_id`.
    ///
    /// Returns the existing node when the parent already has a child with the
    /// same source key. A sibling row with that key and no buddy is linked.
    pub fn add_scope_node(
        &mut self,
        parent_id: NodeId,
        node_type: NodeType,
        data: ItemData,
        sort_index: i64,
    ) -> StoreResult<NodeId> {
        self.require_node(parent_id)?;
        if let Some(key) = data.source_key.as_deref() {
            if let Some(existing) = self.child_node_by_key(parent_id, key) {
                return Ok(existing);
            }
        }

        let buddy = data
            .source_key
            .as_deref()
            .and_then(|key| self.row_by_key(parent_id, key))
            .filter(|row_id| self.rows.get(row_id).is_some_and(|row| row.buddy_node.is_none()));
        let node = new_node(node_type, Some(parent_id), data, sort_index);
        let id = node.id;
        self.nodes.insert(id, node);
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.push(id);
        }
        if let Some(row_id) = buddy {
            self.link_buddies(id, row_id);
        }
        self.events.push(StoreEvent::Inserted {
            item: id.into(),
            parent: Some(parent_id),
        });
        Ok(id)
    }

    /// Adds a row to the listing of `parent_id`.
    ///
    /// Returns the existing row when one with the same source key is already
    /// listed. A sibling node with that key and no buddy is linked.
    pub fn add_results_row(
        &mut self,
        parent_id: NodeId,
        node_type: NodeType,
        data: ItemData,
        sort_index: i64,
    ) -> StoreResult<RowId> {
        self.require_node(parent_id)?;
        if let Some(key) = data.source_key.as_deref() {
            if let Some(existing) = self.row_by_key(parent_id, key) {
                return Ok(existing);
            }
        }

        let buddy = data
            .source_key
            .as_deref()
            .and_then(|key| self.child_node_by_key(parent_id, key))
            .filter(|node_id| {
                self.nodes
                    .get(node_id)
                    .is_some_and(|node| node.buddy_row.is_none())
            });
        let row = ResultsRow {
            id: RowId::generate(),
            node_type,
            parent_id,
            sort_index,
            source_key: data.source_key,
            display_name: data.display_name,
            columns: data.columns,
            attributes: data.attributes,
            buddy_node: None,
        };
        let id = row.id;
        self.rows.insert(id, row);
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.rows.push(id);
        }
        if let Some(node_id) = buddy {
            self.link_buddies(node_id, id);
        }
        self.events.push(StoreEvent::Inserted {
            item: id.into(),
            parent: Some(parent_id),
        });
        Ok(id)
    }

    /// Adds a scope node and its buddy row in one call.
    pub fn add_buddy_pair(
        &mut self,
        parent_id: NodeId,
        node_type: NodeType,
        data: ItemData,
        sort_index: i64,
    ) -> StoreResult<(NodeId, RowId)> {
        let node_id = self.add_scope_node(parent_id, node_type, data.clone(), sort_index)?;
        let row_id = self.add_results_row(parent_id, node_type, data, sort_index)?;

        // Synthetic items have no source key to pair on.
        let node_free = self
            .nodes
            .get(&node_id)
            .is_some_and(|node| node.buddy_row.is_none());
        let row_free = self
            .rows
            .get(&row_id)
            .is_some_and(|row| row.buddy_node.is_none());
        if node_free && row_free {
            self.link_buddies(node_id, row_id);
        }
        Ok((node_id, row_id))
    }

    /// Inserts planned items under an already fetched parent.
    ///
    /// Parents that are not `Fetched` are skipped: their next fetch will
    /// produce the items, so inserting now would create duplicates.
    pub fn insert_planned(
        &mut self,
        parent_id: NodeId,
        items: Vec<PlannedItem>,
    ) -> StoreResult<Vec<ItemId>> {
        let state = self.require_node(parent_id)?.fetch_state;
        if state != FetchState::Fetched {
            debug!(
                "event=store_insert module=store status=skip reason=parent_not_fetched parent={} state={} items={}",
                parent_id,
                state,
                items.len()
            );
            return Ok(Vec::new());
        }
        self.insert_items(parent_id, items)
    }

    /// Moves a node from `NotFetched` to `Fetching`.
    pub fn begin_fetch(&mut self, node_id: NodeId) -> StoreResult<()> {
        self.transition(node_id, FetchState::NotFetched, FetchState::Fetching)
    }

    /// Inserts every fetched child and marks the node `Fetched`.
    pub fn commit_fetch(
        &mut self,
        node_id: NodeId,
        items: Vec<PlannedItem>,
    ) -> StoreResult<Vec<ItemId>> {
        let state = self.require_node(node_id)?.fetch_state;
        if state != FetchState::Fetching {
            return Err(StoreError::InvalidFetchTransition {
                node: node_id,
                from: state,
                to: FetchState::Fetched,
            });
        }
        let inserted = self.insert_items(node_id, items)?;
        self.transition(node_id, FetchState::Fetching, FetchState::Fetched)?;
        Ok(inserted)
    }

    /// Returns a `Fetching` node to `NotFetched` without inserting anything.
    pub fn abort_fetch(&mut self, node_id: NodeId) -> StoreResult<()> {
        self.transition(node_id, FetchState::Fetching, FetchState::NotFetched)
    }

    /// Copies `data` into the item and into its buddy, if any.
    ///
    /// A buddy that no longer exists is skipped silently.
    pub fn update(&mut self, item: ItemId, data: &ItemData) -> StoreResult<()> {
        let buddy = match item {
            ItemId::Node(id) => {
                let node = self.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))?;
                apply_to_node(node, data);
                node.buddy_row.map(ItemId::Row)
            }
            ItemId::Row(id) => {
                let row = self.rows.get_mut(&id).ok_or(StoreError::RowNotFound(id))?;
                apply_to_row(row, data);
                row.buddy_node.map(ItemId::Node)
            }
        };
        self.events.push(StoreEvent::Updated { item });

        let buddy_updated = match buddy {
            Some(ItemId::Node(id)) => self
                .nodes
                .get_mut(&id)
                .map(|node| apply_to_node(node, data))
                .is_some(),
            Some(ItemId::Row(id)) => self
                .rows
                .get_mut(&id)
                .map(|row| apply_to_row(row, data))
                .is_some(),
            None => false,
        };
        if let (Some(buddy), true) = (buddy, buddy_updated) {
            self.events.push(StoreEvent::Updated { item: buddy });
        }
        Ok(())
    }

    /// Removes a node, its descendants and every row they own.
    ///
    /// Buddy links pointing into the removed set are cleared; the node's own
    /// buddy row in the parent listing stays.
    pub fn delete_subtree(&mut self, node_id: NodeId) -> StoreResult<()> {
        let parent_id = self.require_node(node_id)?.parent_id;
        let (nodes, rows) = self.collect_subtree(node_id);
        match parent_id {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|child| *child != node_id);
                }
            }
            None => self.roots.retain(|root| *root != node_id),
        }

        let removed_nodes: HashSet<NodeId> = nodes.iter().copied().collect();
        let removed_rows: HashSet<RowId> = rows.iter().copied().collect();
        for row_id in &rows {
            let Some(row) = self.rows.remove(row_id) else {
                continue;
            };
            if let Some(buddy) = row.buddy_node.filter(|node_id| !removed_nodes.contains(node_id)) {
                if let Some(node) = self.nodes.get_mut(&buddy) {
                    node.buddy_row = None;
                }
            }
            self.events.push(StoreEvent::Removed {
                item: row.id.into(),
                parent: Some(row.parent_id),
            });
        }
        for id in nodes.iter().rev() {
            let Some(node) = self.nodes.remove(id) else {
                continue;
            };
            if let Some(buddy) = node.buddy_row.filter(|row_id| !removed_rows.contains(row_id)) {
                if let Some(row) = self.rows.get_mut(&buddy) {
                    row.buddy_node = None;
                }
            }
            self.events.push(StoreEvent::Removed {
                item: node.id.into(),
                parent: node.parent_id,
            });
        }
        Ok(())
    }

    /// Removes one row from its listing and clears its buddy link.
    pub fn remove_row(&mut self, row_id: RowId) -> StoreResult<()> {
        let row = self
            .rows
            .remove(&row_id)
            .ok_or(StoreError::RowNotFound(row_id))?;
        if let Some(parent) = self.nodes.get_mut(&row.parent_id) {
            parent.rows.retain(|id| *id != row_id);
        }
        if let Some(node) = row.buddy_node.and_then(|id| self.nodes.get_mut(&id)) {
            node.buddy_row = None;
        }
        self.events.push(StoreEvent::Removed {
            item: row_id.into(),
            parent: Some(row.parent_id),
        });
        Ok(())
    }

    /// Removes an item together with its buddy.
    pub fn delete_item(&mut self, item: ItemId) -> StoreResult<()> {
        match item {
            ItemId::Node(id) => {
                let buddy = self.require_node(id)?.buddy_row;
                self.delete_subtree(id)?;
                if let Some(row_id) = buddy.filter(|row_id| self.rows.contains_key(row_id)) {
                    self.remove_row(row_id)?;
                }
            }
            ItemId::Row(id) => {
                let buddy = self.require_row(id)?.buddy_node;
                self.remove_row(id)?;
                if let Some(node_id) = buddy.filter(|node_id| self.nodes.contains_key(node_id)) {
                    self.delete_subtree(node_id)?;
                }
            }
        }
        Ok(())
    }

    /// Discards all direct children and rows and resets the node to `NotFetched`.
    pub fn refresh(&mut self, node_id: NodeId) -> StoreResult<()> {
        let node = self.require_node(node_id)?;
        let children = node.children.clone();
        let rows = node.rows.clone();
        let previous = node.fetch_state;

        for child in children {
            self.delete_subtree(child)?;
        }
        for row_id in rows {
            if self.rows.contains_key(&row_id) {
                self.remove_row(row_id)?;
            }
        }
        if previous != FetchState::NotFetched {
            self.set_fetch_state(node_id, FetchState::NotFetched);
        }
        Ok(())
    }

    /// Finds items in the subtree of `scope_node` whose `role` matches `value`.
    ///
    /// `type_filter` restricts the node types considered; empty means all.
    pub fn search(
        &self,
        role: Role,
        value: &Value,
        scope_node: NodeId,
        type_filter: &[NodeType],
    ) -> Vec<ItemId> {
        if !self.nodes.contains_key(&scope_node) {
            return Vec::new();
        }
        let type_ok = |node_type: NodeType| type_filter.is_empty() || type_filter.contains(&node_type);
        let (nodes, rows) = self.collect_subtree(scope_node);

        let mut out = Vec::new();
        for id in nodes {
            if let Some(node) = self.nodes.get(&id) {
                if type_ok(node.node_type)
                    && role_matches(role, value, node.source_key.as_deref(), &node.attributes)
                {
                    out.push(ItemId::Node(id));
                }
            }
        }
        for id in rows {
            if let Some(row) = self.rows.get(&id) {
                if type_ok(row.node_type)
                    && role_matches(role, value, row.source_key.as_deref(), &row.attributes)
                {
                    out.push(ItemId::Row(id));
                }
            }
        }
        out
    }

    /// Finds items with source key `key` under every root.
    pub fn find_by_key(&self, key: &str, type_filter: &[NodeType]) -> Vec<ItemId> {
        let value = Value::Text(key.to_string());
        self.roots
            .iter()
            .flat_map(|root| self.search(Role::Dn, &value, *root, type_filter))
            .collect()
    }

    /// Returns every scope node of one type, in no particular order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.node_type == node_type)
            .map(|node| node.id)
            .collect()
    }

    /// Orders children and rows by sort index, then case-insensitive name.
    pub fn sort(&mut self, node_id: NodeId) -> StoreResult<()> {
        let node = self.require_node(node_id)?;
        let mut children = node.children.clone();
        let mut rows = node.rows.clone();

        children.sort_by_cached_key(|id| {
            self.nodes.get(id).map_or((i64::MAX, String::new()), |node| {
                (node.sort_index, node.display_name.to_lowercase())
            })
        });
        rows.sort_by_cached_key(|id| {
            self.rows.get(id).map_or((i64::MAX, String::new()), |row| {
                (row.sort_index, row.display_name.to_lowercase())
            })
        });

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.children = children;
            node.rows = rows;
        }
        self.events.push(StoreEvent::Resorted { node: node_id });
        Ok(())
    }

    /// Checks every structural invariant of the graph.
    pub fn validate(&self) -> StoreResult<()> {
        let violated = |message: String| Err(StoreError::InvariantViolated(message));

        for root in &self.roots {
            match self.nodes.get(root) {
                Some(node) if node.parent_id.is_none() => {}
                _ => return violated(format!("root {root} is missing or has a parent")),
            }
        }

        for (id, node) in &self.nodes {
            let mut current = node.parent_id;
            let mut steps = 0;
            while let Some(parent_id) = current {
                steps += 1;
                if steps > self.nodes.len() {
                    return violated(format!("parent chain of {id} is cyclic"));
                }
                match self.nodes.get(&parent_id) {
                    Some(parent) => current = parent.parent_id,
                    None => return violated(format!("parent {parent_id} of {id} is missing")),
                }
            }

            match node.parent_id {
                Some(parent_id) => {
                    let listed = self
                        .nodes
                        .get(&parent_id)
                        .is_some_and(|parent| parent.children.contains(id));
                    if !listed {
                        return violated(format!("{id} is not listed by its parent"));
                    }
                }
                None if !self.roots.contains(id) => {
                    return violated(format!("parentless {id} is not a root"));
                }
                None => {}
            }

            let mut keys = HashSet::new();
            for child_id in &node.children {
                let Some(child) = self.nodes.get(child_id) else {
                    return violated(format!("child {child_id} of {id} is missing"));
                };
                if child.parent_id != Some(*id) {
                    return violated(format!("child {child_id} does not point back to {id}"));
                }
                if let Some(key) = &child.source_key {
                    if !keys.insert(key.to_ascii_lowercase()) {
                        return violated(format!("duplicate child key {key} under {id}"));
                    }
                }
            }

            if let Some(row_id) = node.buddy_row {
                match self.rows.get(&row_id) {
                    Some(row) if row.buddy_node == Some(*id) => {}
                    _ => return violated(format!("buddy row {row_id} of {id} does not point back")),
                }
            }
        }

        for (id, row) in &self.rows {
            let listed = self
                .nodes
                .get(&row.parent_id)
                .is_some_and(|parent| parent.rows.contains(id));
            if !listed {
                return violated(format!("{id} is not listed by its parent"));
            }
            if let Some(node_id) = row.buddy_node {
                let Some(node) = self.nodes.get(&node_id) else {
                    return violated(format!("buddy node {node_id} of {id} is missing"));
                };
                if node.buddy_row != Some(*id) || node.parent_id != Some(row.parent_id) {
                    return violated(format!("buddy link {id} <-> {node_id} is inconsistent"));
                }
                if node.source_key != row.source_key || node.attributes != row.attributes {
                    return violated(format!("buddy {id} diverged from {node_id}"));
                }
            }
        }
        Ok(())
    }

    /// Returns and clears queued mutation events.
    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn row(&self, id: RowId) -> Option<&ResultsRow> {
        self.rows.get(&id)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn rows_of(&self, id: NodeId) -> &[RowId] {
        self.nodes
            .get(&id)
            .map(|node| node.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        match item {
            ItemId::Node(id) => self.nodes.contains_key(&id),
            ItemId::Row(id) => self.rows.contains_key(&id),
        }
    }

    pub fn fetch_state(&self, id: NodeId) -> Option<FetchState> {
        self.nodes.get(&id).map(|node| node.fetch_state)
    }

    /// Returns the node owning the item: a node's parent, or a row's listing owner.
    pub fn parent_of(&self, item: ItemId) -> Option<NodeId> {
        match item {
            ItemId::Node(id) => self.nodes.get(&id).and_then(|node| node.parent_id),
            ItemId::Row(id) => self.rows.get(&id).map(|row| row.parent_id),
        }
    }

    pub fn buddy_of(&self, item: ItemId) -> Option<ItemId> {
        match item {
            ItemId::Node(id) => self
                .nodes
                .get(&id)
                .and_then(|node| node.buddy_row)
                .map(ItemId::Row),
            ItemId::Row(id) => self
                .rows
                .get(&id)
                .and_then(|row| row.buddy_node)
                .map(ItemId::Node),
        }
    }

    pub fn source_key(&self, item: ItemId) -> Option<&str> {
        match item {
            ItemId::Node(id) => self.nodes.get(&id).and_then(|node| node.source_key.as_deref()),
            ItemId::Row(id) => self.rows.get(&id).and_then(|row| row.source_key.as_deref()),
        }
    }

    pub fn node_type(&self, item: ItemId) -> Option<NodeType> {
        match item {
            ItemId::Node(id) => self.nodes.get(&id).map(|node| node.node_type),
            ItemId::Row(id) => self.rows.get(&id).map(|row| row.node_type),
        }
    }

    pub fn display_name(&self, item: ItemId) -> Option<&str> {
        match item {
            ItemId::Node(id) => self.nodes.get(&id).map(|node| node.display_name.as_str()),
            ItemId::Row(id) => self.rows.get(&id).map(|row| row.display_name.as_str()),
        }
    }

    pub fn attribute(&self, item: ItemId, role: Role) -> Option<&Value> {
        match item {
            ItemId::Node(id) => self.nodes.get(&id).and_then(|node| node.attribute(role)),
            ItemId::Row(id) => self.rows.get(&id).and_then(|row| row.attribute(role)),
        }
    }

    /// Returns the scope node standing for `item`: itself, or a row's buddy node.
    pub fn scope_node_of(&self, item: ItemId) -> Option<NodeId> {
        match item {
            ItemId::Node(id) => self.nodes.contains_key(&id).then_some(id),
            ItemId::Row(id) => self.rows.get(&id).and_then(|row| row.buddy_node),
        }
    }

    /// Finds a child node or row of `parent_id` with the given source key.
    ///
    /// Nodes are preferred over rows.
    pub fn find_child_by_key(&self, parent_id: NodeId, key: &str) -> Option<ItemId> {
        self.child_node_by_key(parent_id, key)
            .map(ItemId::Node)
            .or_else(|| self.row_by_key(parent_id, key).map(ItemId::Row))
    }

    /// Returns whether `ancestor` lies on the parent chain of `node_id`.
    pub fn is_ancestor(&self, ancestor: NodeId, node_id: NodeId) -> bool {
        let mut current = self.nodes.get(&node_id).and_then(|node| node.parent_id);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.nodes.get(&id).and_then(|node| node.parent_id);
        }
        false
    }

    fn insert_items(
        &mut self,
        parent_id: NodeId,
        items: Vec<PlannedItem>,
    ) -> StoreResult<Vec<ItemId>> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            match item.placement {
                Placement::ScopeOnly => {
                    let id =
                        self.add_scope_node(parent_id, item.node_type, item.data, item.sort_index)?;
                    inserted.push(ItemId::Node(id));
                }
                Placement::ResultsOnly => {
                    let id =
                        self.add_results_row(parent_id, item.node_type, item.data, item.sort_index)?;
                    inserted.push(ItemId::Row(id));
                }
                Placement::Buddy => {
                    let (node_id, row_id) =
                        self.add_buddy_pair(parent_id, item.node_type, item.data, item.sort_index)?;
                    inserted.push(ItemId::Node(node_id));
                    inserted.push(ItemId::Row(row_id));
                }
            }
        }
        Ok(inserted)
    }

    fn transition(&mut self, node_id: NodeId, from: FetchState, to: FetchState) -> StoreResult<()> {
        let current = self.require_node(node_id)?.fetch_state;
        if current != from {
            return Err(StoreError::InvalidFetchTransition {
                node: node_id,
                from: current,
                to,
            });
        }
        self.set_fetch_state(node_id, to);
        Ok(())
    }

    fn set_fetch_state(&mut self, node_id: NodeId, state: FetchState) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.fetch_state = state;
            self.events.push(StoreEvent::FetchStateChanged {
                node: node_id,
                state,
            });
        }
    }

    fn require_node(&self, id: NodeId) -> StoreResult<&Node> {
        self.nodes.get(&id).ok_or(StoreError::NodeNotFound(id))
    }

    fn require_row(&self, id: RowId) -> StoreResult<&ResultsRow> {
        self.rows.get(&id).ok_or(StoreError::RowNotFound(id))
    }

    fn child_node_by_key(&self, parent_id: NodeId, key: &str) -> Option<NodeId> {
        self.children(parent_id).iter().copied().find(|id| {
            self.nodes
                .get(id)
                .and_then(|node| node.source_key.as_deref())
                .is_some_and(|candidate| dn_equals(candidate, key))
        })
    }

    fn row_by_key(&self, parent_id: NodeId, key: &str) -> Option<RowId> {
        self.rows_of(parent_id).iter().copied().find(|id| {
            self.rows
                .get(id)
                .and_then(|row| row.source_key.as_deref())
                .is_some_and(|candidate| dn_equals(candidate, key))
        })
    }

    fn link_buddies(&mut self, node_id: NodeId, row_id: RowId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.buddy_row = Some(row_id);
        }
        if let Some(row) = self.rows.get_mut(&row_id) {
            row.buddy_node = Some(node_id);
        }
    }

    /// Returns the node and every descendant (pre-order) plus all rows they own.
    fn collect_subtree(&self, node_id: NodeId) -> (Vec<NodeId>, Vec<RowId>) {
        let mut nodes = Vec::new();
        let mut rows = Vec::new();
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            nodes.push(id);
            rows.extend(node.rows.iter().copied());
            stack.extend(node.children.iter().rev().copied());
        }
        (nodes, rows)
    }
}

fn new_node(
    node_type: NodeType,
    parent_id: Option<NodeId>,
    data: ItemData,
    sort_index: i64,
) -> Node {
    Node {
        id: NodeId::generate(),
        node_type,
        parent_id,
        fetch_state: FetchState::NotFetched,
        sort_index,
        source_key: data.source_key,
        display_name: data.display_name,
        attributes: data.attributes,
        children: Vec::new(),
        rows: Vec::new(),
        buddy_row: None,
    }
}

fn apply_to_node(node: &mut Node, data: &ItemData) {
    node.source_key = data.source_key.clone();
    node.display_name = data.display_name.clone();
    node.attributes = data.attributes.clone();
}

fn apply_to_row(row: &mut ResultsRow, data: &ItemData) {
    row.source_key = data.source_key.clone();
    row.display_name = data.display_name.clone();
    row.columns = data.columns.clone();
    row.attributes = data.attributes.clone();
}

fn role_matches(
    role: Role,
    value: &Value,
    source_key: Option<&str>,
    attributes: &std::collections::BTreeMap<Role, Value>,
) -> bool {
    match role {
        Role::Dn => source_key.is_some_and(|key| Value::Text(key.to_string()).matches(value)),
        _ => attributes
            .get(&role)
            .is_some_and(|current| current.matches(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemStore, Placement, PlannedItem, StoreError};
    use crate::model::node::{FetchState, ItemData, ItemId, NodeType};

    fn data(key: &str) -> ItemData {
        ItemData {
            source_key: Some(key.to_string()),
            display_name: key.to_string(),
            columns: vec![key.to_string()],
            ..ItemData::default()
        }
    }

    #[test]
    fn fetch_state_only_advances_in_order() {
        let mut store = ItemStore::new();
        let root = store.add_root(NodeType::DomainObject, data("DC=x"), 0);

        let error = store.commit_fetch(root, Vec::new()).unwrap_err();
        assert!(matches!(error, StoreError::InvalidFetchTransition { .. }));

        store.begin_fetch(root).unwrap();
        assert!(store.begin_fetch(root).is_err());
        store.commit_fetch(root, Vec::new()).unwrap();
        assert_eq!(store.fetch_state(root), Some(FetchState::Fetched));
        assert!(store.abort_fetch(root).is_err());
    }

    #[test]
    fn synthetic_buddy_pair_is_linked_without_key() {
        let mut store = ItemStore::new();
        let root = store.add_root(NodeType::PolicyOrgUnit, data("DC=x"), 0);
        let (node, row) = store
            .add_buddy_pair(root, NodeType::SyntheticFolder, ItemData::synthetic("All policies"), 2)
            .unwrap();
        assert_eq!(store.buddy_of(ItemId::Node(node)), Some(ItemId::Row(row)));
        store.validate().unwrap();
    }

    #[test]
    fn commit_inserts_each_placement() {
        let mut store = ItemStore::new();
        let root = store.add_root(NodeType::DomainObject, data("DC=x"), 0);
        store.begin_fetch(root).unwrap();
        let inserted = store
            .commit_fetch(
                root,
                vec![
                    PlannedItem::new(NodeType::DomainObject, data("OU=a,DC=x"), Placement::Buddy),
                    PlannedItem::new(NodeType::DomainObject, data("CN=u,DC=x"), Placement::ResultsOnly),
                    PlannedItem::new(NodeType::DomainObject, data("CN=c,DC=x"), Placement::ScopeOnly),
                ],
            )
            .unwrap();
        assert_eq!(inserted.len(), 4);
        assert_eq!(store.children(root).len(), 2);
        assert_eq!(store.rows_of(root).len(), 2);
        store.validate().unwrap();
    }
}
