//! Domain and organizational units inside the policy tree.
//!
//! # Responsibility
//! - List child OUs and linked policies of one OU.
//! - Link policies dropped onto an OU by rewriting its `gPLink`.
//!
//! # Invariants
//! - Only the domain gets the "All policies" folder.
//! - Linked policies that no longer exist are skipped, not reported.

use crate::behavior::all_policies::planned_all_policies;
use crate::behavior::policy::planned_linked_policy;
use crate::behavior::{
    classes_value, refresh_if_fetched, ActionId, Activation, BehaviorContext, CustomAction,
    DropAction, DropExecution, DropItemResult, DropOutcome, DropRequest, NodeBehavior,
    StandardAction, StorePatch,
};
use crate::directory::filter::filter_equals;
use crate::directory::{
    DirectoryError, DirectoryResult, DirectoryService, SearchRequest, SearchScope,
};
use crate::model::dn::dn_equals;
use crate::model::entry::{
    Entry, ATTRIBUTE_GPLINK, ATTRIBUTE_OBJECT_CLASS, CLASS_GP_CONTAINER, CLASS_OU,
};
use crate::model::gplink::{Gplink, GplinkOption};
use crate::model::node::{ItemData, ItemId, Node, NodeType, Role, Value};
use crate::store::{Placement, PlannedItem};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Sort bucket of child OUs; linked policies use the default bucket.
pub const OU_SORT_INDEX: i64 = 1;

/// Behavior of [`NodeType::PolicyOrgUnit`] items.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyOuBehavior;

/// Display data of a domain or OU in the policy tree.
pub fn policy_ou_item_data(entry: &Entry) -> ItemData {
    let gplink = Gplink::parse(entry.get_string(ATTRIBUTE_GPLINK).unwrap_or_default());
    let name = entry.display_name();

    let mut attributes = BTreeMap::new();
    attributes.insert(Role::ObjectClasses, classes_value(entry));
    attributes.insert(
        Role::InheritanceBlocked,
        Value::Bool(entry.inheritance_blocked()),
    );
    attributes.insert(
        Role::EnforcedPolicies,
        Value::List(gplink.gpos_with_option(GplinkOption::Enforced)),
    );
    attributes.insert(
        Role::DisabledPolicies,
        Value::List(gplink.gpos_with_option(GplinkOption::Disabled)),
    );

    ItemData {
        source_key: Some(entry.dn.clone()),
        columns: vec![name.clone()],
        display_name: name,
        attributes,
    }
}

/// Planned tree node for one OU under a policy tree parent.
pub fn planned_ou(entry: &Entry) -> PlannedItem {
    PlannedItem::new(
        NodeType::PolicyOrgUnit,
        policy_ou_item_data(entry),
        Placement::ScopeOnly,
    )
    .with_sort_index(OU_SORT_INDEX)
}

/// Appends policies to the `gPLink` of `ou_dn`.
///
/// Returns the policies that were not linked before. The attribute is only
/// written when something was added.
pub fn link_policies(
    directory: &dyn DirectoryService,
    ou_dn: &str,
    policy_dns: &[String],
) -> DirectoryResult<Vec<String>> {
    let ou = directory.get(ou_dn)?;
    let mut gplink = Gplink::parse(ou.get_string(ATTRIBUTE_GPLINK).unwrap_or_default());
    let added: Vec<String> = policy_dns
        .iter()
        .filter(|dn| gplink.add(dn))
        .cloned()
        .collect();
    if added.is_empty() {
        return Ok(added);
    }
    directory.modify_attribute(ou_dn, ATTRIBUTE_GPLINK, &[gplink.to_string()])?;
    Ok(added)
}

/// Reads linked policies, skipping ones that were deleted meanwhile.
fn linked_policy_entries(
    directory: &dyn DirectoryService,
    ou: &Entry,
) -> DirectoryResult<Vec<Entry>> {
    let gplink = Gplink::parse(ou.get_string(ATTRIBUTE_GPLINK).unwrap_or_default());
    let mut out = Vec::new();
    for policy_dn in gplink.gpo_list() {
        match directory.get(&policy_dn) {
            Ok(entry) => out.push(entry),
            Err(DirectoryError::NotFound(_)) => {
                debug!(
                    "event=policy_ou_fetch module=behavior status=skip reason=missing_policy ou={} policy={}",
                    ou.dn, policy_dn
                );
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

impl NodeBehavior for PolicyOuBehavior {
    fn node_type(&self) -> NodeType {
        NodeType::PolicyOrgUnit
    }

    fn item_data(&self, _ctx: &BehaviorContext<'_>, entry: &Entry) -> ItemData {
        policy_ou_item_data(entry)
    }

    fn plan_children(
        &self,
        _ctx: &BehaviorContext<'_>,
        _parent: &Node,
        entries: Vec<Entry>,
    ) -> Vec<PlannedItem> {
        entries
            .iter()
            .filter_map(|entry| {
                if entry.is_class(CLASS_OU) {
                    Some(planned_ou(entry))
                } else if entry.is_class(CLASS_GP_CONTAINER) {
                    Some(planned_linked_policy(entry))
                } else {
                    None
                }
            })
            .collect()
    }

    fn fetch(&self, ctx: &BehaviorContext<'_>, node: &Node) -> DirectoryResult<Vec<PlannedItem>> {
        let Some(dn) = node.source_key.as_deref() else {
            return Ok(Vec::new());
        };

        let request = SearchRequest::new(
            dn,
            SearchScope::Children,
            filter_equals(ATTRIBUTE_OBJECT_CLASS, CLASS_OU),
        );
        let mut planned: Vec<PlannedItem> = ctx
            .directory
            .search(&request)?
            .values()
            .map(planned_ou)
            .collect();

        if dn_equals(dn, &ctx.settings.domain_head) {
            planned.push(planned_all_policies());
        }

        let ou = ctx.directory.get(dn)?;
        planned.extend(
            linked_policy_entries(ctx.directory, &ou)?
                .iter()
                .map(planned_linked_policy),
        );
        Ok(planned)
    }

    fn can_drop(&self, _ctx: &BehaviorContext<'_>, request: &DropRequest<'_>) -> bool {
        request.dragged_types.len() == 1 && request.dragged_types.contains(&NodeType::Policy)
    }

    fn execute_drop(
        &self,
        ctx: &BehaviorContext<'_>,
        request: &DropRequest<'_>,
    ) -> DropExecution {
        let mut execution = DropExecution::default();
        let result = |item: ItemId, outcome| DropItemResult {
            item,
            source_key: ctx.store.source_key(item).map(str::to_string),
            action: DropAction::LinkPolicy,
            outcome,
        };
        let Some(ou_dn) = ctx.store.source_key(request.target) else {
            execution.results = request
                .dragged
                .iter()
                .map(|item| {
                    let reason = "target has no directory identity".to_string();
                    result(*item, DropOutcome::Rejected(reason))
                })
                .collect();
            return execution;
        };

        let policy_dns: Vec<String> = request
            .dragged
            .iter()
            .filter_map(|item| ctx.store.source_key(*item).map(str::to_string))
            .collect();
        let added = match link_policies(ctx.directory, ou_dn, &policy_dns) {
            Ok(added) => added,
            Err(err) => {
                execution.results = request
                    .dragged
                    .iter()
                    .map(|item| result(*item, DropOutcome::Failed(err.to_string())))
                    .collect();
                return execution;
            }
        };

        for item in request.dragged {
            let newly_linked = ctx
                .store
                .source_key(*item)
                .is_some_and(|dn| added.iter().any(|added| dn_equals(added, dn)));
            let outcome = if newly_linked {
                DropOutcome::Applied
            } else {
                DropOutcome::Rejected(format!("already linked to {ou_dn}"))
            };
            execution.results.push(result(*item, outcome));
        }

        if let Some(parent) = ctx.store.scope_node_of(request.target) {
            let items: Vec<PlannedItem> = added
                .iter()
                .filter_map(|dn| ctx.directory.get(dn).ok())
                .map(|entry| planned_linked_policy(&entry))
                .collect();
            execution.patches.push(StorePatch::Insert { parent, items });
        }
        if let Ok(ou) = ctx.directory.get(ou_dn) {
            execution.patches.push(StorePatch::Update {
                item: request.target,
                data: policy_ou_item_data(&ou),
            });
        }
        execution
    }

    fn custom_actions(&self, ctx: &BehaviorContext<'_>, selection: &[ItemId]) -> Vec<CustomAction> {
        let [item] = selection else {
            return Vec::new();
        };
        let blocked = ctx
            .store
            .attribute(*item, Role::InheritanceBlocked)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut out = vec![
            CustomAction::new(ActionId::NewOu, "Create OU"),
            CustomAction::new(ActionId::CreateAndLinkPolicy, "Create a policy and link to this OU"),
            CustomAction::new(ActionId::LinkPolicy, "Link existing policy"),
            CustomAction::checkable(ActionId::BlockInheritance, "Block inheritance", blocked),
        ];
        if ctx.is_domain_head(*item) {
            out.push(CustomAction::new(ActionId::FindPolicy, "Find policy"));
        }
        out
    }

    fn standard_actions(
        &self,
        ctx: &BehaviorContext<'_>,
        selection: &[ItemId],
    ) -> BTreeSet<StandardAction> {
        let mut out = BTreeSet::new();
        if selection.is_empty() {
            return out;
        }
        if selection.len() == 1 {
            out.insert(StandardAction::Properties);
        }
        if refresh_if_fetched(ctx, selection) {
            out.insert(StandardAction::Refresh);
        }
        if !selection.iter().any(|item| ctx.is_domain_head(*item)) {
            if selection.len() == 1 {
                out.insert(StandardAction::Rename);
            }
            out.insert(StandardAction::Delete);
        }
        out
    }

    fn activation(&self, _ctx: &BehaviorContext<'_>, item: ItemId) -> Activation {
        Activation::Properties(item)
    }
}
