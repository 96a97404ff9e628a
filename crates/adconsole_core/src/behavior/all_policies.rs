//! "All policies" folder under the domain in the policy tree.

use crate::behavior::policy::planned_linked_policy;
use crate::behavior::{
    refresh_if_fetched, ActionId, Activation, BehaviorContext, CustomAction, NodeBehavior,
    StandardAction,
};
use crate::directory::filter::filter_equals;
use crate::directory::{DirectoryResult, SearchRequest, SearchScope};
use crate::model::entry::{Entry, ATTRIBUTE_OBJECT_CLASS, CLASS_GP_CONTAINER};
use crate::model::node::{ItemData, ItemId, Node, NodeType};
use crate::store::{Placement, PlannedItem};
use std::collections::BTreeSet;

pub const ALL_POLICIES_NAME: &str = "All policies";
/// Sorts after child OUs.
pub const ALL_POLICIES_SORT_INDEX: i64 = 2;

/// Behavior of [`NodeType::SyntheticFolder`] items.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllPoliciesBehavior;

/// Planned folder node added to the domain's policy OU.
pub fn planned_all_policies() -> PlannedItem {
    PlannedItem::new(
        NodeType::SyntheticFolder,
        ItemData::synthetic(ALL_POLICIES_NAME),
        Placement::ScopeOnly,
    )
    .with_sort_index(ALL_POLICIES_SORT_INDEX)
}

impl NodeBehavior for AllPoliciesBehavior {
    fn node_type(&self) -> NodeType {
        NodeType::SyntheticFolder
    }

    fn item_data(&self, _ctx: &BehaviorContext<'_>, _entry: &Entry) -> ItemData {
        ItemData::synthetic(ALL_POLICIES_NAME)
    }

    fn plan_children(
        &self,
        _ctx: &BehaviorContext<'_>,
        _parent: &Node,
        entries: Vec<Entry>,
    ) -> Vec<PlannedItem> {
        entries
            .iter()
            .filter(|entry| entry.is_class(CLASS_GP_CONTAINER))
            .map(planned_linked_policy)
            .collect()
    }

    /// Lists every policy object in the domain.
    fn fetch(&self, ctx: &BehaviorContext<'_>, node: &Node) -> DirectoryResult<Vec<PlannedItem>> {
        let request = SearchRequest::new(
            ctx.settings.domain_head.trim(),
            SearchScope::All,
            filter_equals(ATTRIBUTE_OBJECT_CLASS, CLASS_GP_CONTAINER),
        );
        let results = ctx.directory.search(&request)?;
        Ok(self.plan_children(ctx, node, results.into_values().collect()))
    }

    fn custom_actions(&self, _ctx: &BehaviorContext<'_>, selection: &[ItemId]) -> Vec<CustomAction> {
        match selection {
            [_] => vec![CustomAction::new(ActionId::CreatePolicy, "New policy")],
            _ => Vec::new(),
        }
    }

    fn standard_actions(
        &self,
        ctx: &BehaviorContext<'_>,
        selection: &[ItemId],
    ) -> BTreeSet<StandardAction> {
        let mut out = BTreeSet::new();
        if refresh_if_fetched(ctx, selection) {
            out.insert(StandardAction::Refresh);
        }
        out
    }

    fn activation(&self, ctx: &BehaviorContext<'_>, item: ItemId) -> Activation {
        match ctx.store.scope_node_of(item) {
            Some(node) => Activation::NavigateInto(node),
            None => Activation::Properties(item),
        }
    }
}
