//! "Group Policy Objects" root of the policy tree.
//!
//! Its only child is the domain, shown as a policy OU.

use crate::behavior::policy_ou::planned_ou;
use crate::behavior::{
    refresh_if_fetched, ActionId, BehaviorContext, CustomAction, NodeBehavior, StandardAction,
};
use crate::directory::DirectoryResult;
use crate::model::entry::{Entry, CLASS_DOMAIN};
use crate::model::node::{ItemData, ItemId, Node, NodeType};
use crate::store::PlannedItem;
use std::collections::BTreeSet;

pub const POLICY_ROOT_NAME: &str = "Group Policy Objects";

/// Behavior of [`NodeType::PolicyContainer`] items.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyContainerBehavior;

/// DN of the container holding every policy of the domain.
pub fn policies_container_dn(domain_head: &str) -> String {
    format!("CN=Policies,CN=System,{}", domain_head.trim())
}

impl NodeBehavior for PolicyContainerBehavior {
    fn node_type(&self) -> NodeType {
        NodeType::PolicyContainer
    }

    fn item_data(&self, _ctx: &BehaviorContext<'_>, entry: &Entry) -> ItemData {
        ItemData {
            source_key: Some(entry.dn.clone()),
            ..ItemData::synthetic(POLICY_ROOT_NAME)
        }
    }

    fn plan_children(
        &self,
        _ctx: &BehaviorContext<'_>,
        _parent: &Node,
        entries: Vec<Entry>,
    ) -> Vec<PlannedItem> {
        entries
            .iter()
            .filter(|entry| entry.is_class(CLASS_DOMAIN))
            .map(|entry| planned_ou(entry).with_sort_index(0))
            .collect()
    }

    fn fetch(&self, ctx: &BehaviorContext<'_>, node: &Node) -> DirectoryResult<Vec<PlannedItem>> {
        let domain = ctx.directory.get(ctx.settings.domain_head.trim())?;
        Ok(self.plan_children(ctx, node, vec![domain]))
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
}

#[cfg(test)]
mod tests {
    use super::policies_container_dn;

    #[test]
    fn policies_live_under_system() {
        assert_eq!(
            policies_container_dn(" DC=corp,DC=local "),
            "CN=Policies,CN=System,DC=corp,DC=local"
        );
    }
}
