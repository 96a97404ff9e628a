//! Group policy objects.

use crate::behavior::policy_ou::{link_policies, policy_ou_item_data};
use crate::behavior::{
    classes_value, ActionId, Activation, BehaviorContext, CustomAction, DropAction,
    DropExecution, DropItemResult, DropOutcome, DropRequest, NodeBehavior, StandardAction,
    StorePatch,
};
use crate::directory::DirectoryResult;
use crate::model::entry::{Entry, ATTRIBUTE_DISPLAY_NAME};
use crate::model::node::{ItemData, ItemId, Node, NodeType, Role};
use crate::store::{Placement, PlannedItem};
use std::collections::{BTreeMap, BTreeSet};

/// Behavior of [`NodeType::Policy`] items.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyBehavior;

/// Display data of one policy. The display name wins over the GUID RDN.
pub fn policy_item_data(entry: &Entry) -> ItemData {
    let name = match entry.get_string(ATTRIBUTE_DISPLAY_NAME) {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => entry.display_name(),
    };
    let mut attributes = BTreeMap::new();
    attributes.insert(Role::ObjectClasses, classes_value(entry));
    ItemData {
        source_key: Some(entry.dn.clone()),
        columns: vec![name.clone()],
        display_name: name,
        attributes,
    }
}

/// Planned buddy pair for a policy listed under an OU or a policy folder.
pub fn planned_linked_policy(entry: &Entry) -> PlannedItem {
    PlannedItem::new(NodeType::Policy, policy_item_data(entry), Placement::Buddy)
}

impl NodeBehavior for PolicyBehavior {
    fn node_type(&self) -> NodeType {
        NodeType::Policy
    }

    fn item_data(&self, _ctx: &BehaviorContext<'_>, entry: &Entry) -> ItemData {
        policy_item_data(entry)
    }

    fn plan_children(
        &self,
        _ctx: &BehaviorContext<'_>,
        _parent: &Node,
        _entries: Vec<Entry>,
    ) -> Vec<PlannedItem> {
        Vec::new()
    }

    /// Policies are leaves.
    fn fetch(&self, _ctx: &BehaviorContext<'_>, _node: &Node) -> DirectoryResult<Vec<PlannedItem>> {
        Ok(Vec::new())
    }

    /// Dropping OUs onto a policy links the policy to each of them.
    fn can_drop(&self, _ctx: &BehaviorContext<'_>, request: &DropRequest<'_>) -> bool {
        request.dragged_types.len() == 1 && request.dragged_types.contains(&NodeType::PolicyOrgUnit)
    }

    fn execute_drop(
        &self,
        ctx: &BehaviorContext<'_>,
        request: &DropRequest<'_>,
    ) -> DropExecution {
        let mut execution = DropExecution::default();
        let policy_dn = ctx.store.source_key(request.target).map(str::to_string);
        let policy = policy_dn
            .as_deref()
            .and_then(|dn| ctx.directory.get(dn).ok());

        for item in request.dragged {
            let ou_dn = ctx.store.source_key(*item).map(str::to_string);
            let outcome = match (ou_dn.as_deref(), policy.as_ref()) {
                (Some(ou_dn), Some(policy)) => {
                    match link_policies(ctx.directory, ou_dn, &[policy.dn.clone()]) {
                        Ok(added) if added.is_empty() => {
                            DropOutcome::Rejected(format!("already linked to {ou_dn}"))
                        }
                        Ok(_) => {
                            if let Some(parent) = ctx.store.scope_node_of(*item) {
                                execution.patches.push(StorePatch::Insert {
                                    parent,
                                    items: vec![planned_linked_policy(policy)],
                                });
                            }
                            if let Ok(ou) = ctx.directory.get(ou_dn) {
                                execution.patches.push(StorePatch::Update {
                                    item: *item,
                                    data: policy_ou_item_data(&ou),
                                });
                            }
                            DropOutcome::Applied
                        }
                        Err(err) => DropOutcome::Failed(err.to_string()),
                    }
                }
                _ => DropOutcome::Rejected("missing policy or OU identity".to_string()),
            };
            execution.results.push(DropItemResult {
                item: *item,
                source_key: ou_dn,
                action: DropAction::LinkPolicy,
                outcome,
            });
        }
        execution
    }

    fn custom_actions(&self, _ctx: &BehaviorContext<'_>, selection: &[ItemId]) -> Vec<CustomAction> {
        if selection.is_empty() {
            return Vec::new();
        }
        vec![CustomAction::new(ActionId::AddLink, "Add link")]
    }

    fn standard_actions(
        &self,
        _ctx: &BehaviorContext<'_>,
        selection: &[ItemId],
    ) -> BTreeSet<StandardAction> {
        let mut out = BTreeSet::new();
        if selection.len() == 1 {
            out.insert(StandardAction::Properties);
            out.insert(StandardAction::Rename);
        }
        if !selection.is_empty() {
            out.insert(StandardAction::Delete);
        }
        out
    }

    fn activation(&self, _ctx: &BehaviorContext<'_>, item: ItemId) -> Activation {
        Activation::Properties(item)
    }
}

#[cfg(test)]
mod tests {
    use super::policy_item_data;
    use crate::model::entry::Entry;

    #[test]
    fn display_name_wins_over_guid() {
        let entry = Entry::new("CN={A1},CN=Policies,CN=System,DC=x", ["groupPolicyContainer"])
            .with_attribute("displayName", "Default Domain Policy");
        let data = policy_item_data(&entry);
        assert_eq!(data.display_name, "Default Domain Policy");
        assert_eq!(data.columns, vec!["Default Domain Policy"]);
    }

    #[test]
    fn falls_back_to_rdn_without_display_name() {
        let entry = Entry::new("CN={A1},CN=Policies,CN=System,DC=x", ["groupPolicyContainer"]);
        assert_eq!(policy_item_data(&entry).display_name, "{A1}");
    }
}
