//! Behavior of ordinary directory objects.
//!
//! # Responsibility
//! - Load the children of a container and split them into tree nodes and
//!   listing rows.
//! - Derive the drop action for one dragged object: move, or add to group.
//!
//! # Invariants
//! - Containers (per the schema or `show_non_containers`) get a buddy pair;
//!   everything else is listed only.
//! - Containers always pass the user filter.
//! - Dropping onto the current parent resolves to no action.

use crate::behavior::{
    classes_value, refresh_if_fetched, policy_ou, ActionId, BehaviorContext, CustomAction,
    DropAction, DropExecution, DropItemResult, DropOutcome, DropRequest, NodeBehavior,
    StandardAction, StorePatch,
};
use crate::config::BrowserSettings;
use crate::directory::filter::{filter_and, filter_equals, filter_not, filter_or};
use crate::directory::{DirectoryResult, SearchRequest, SearchScope};
use crate::model::dn::{dn_equals, is_descendant_of, parent_dn};
use crate::model::entry::{
    Entry, ATTRIBUTE_DESCRIPTION, ATTRIBUTE_OBJECT_CLASS, ATTRIBUTE_SHOW_IN_ADVANCED_VIEW_ONLY,
    CLASS_COMPUTER, CLASS_DOMAIN, CLASS_GROUP, CLASS_OU, CLASS_USER,
};
use crate::model::node::{ItemData, ItemId, Node, NodeType, Role, Value};
use crate::store::{Placement, PlannedItem};
use std::collections::{BTreeMap, BTreeSet};

/// Behavior of [`NodeType::DomainObject`] items.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectBehavior;

/// Filter used to list the children of a container.
///
/// The user filter is OR-ed with a container filter so containers always show.
/// Advanced-view-only objects are hidden unless advanced features are on.
pub fn children_filter(settings: &BrowserSettings) -> String {
    let containers: Vec<String> = settings
        .schema
        .container_classes
        .iter()
        .map(|class| filter_equals(ATTRIBUTE_OBJECT_CLASS, class))
        .collect();
    let visible = if settings.user_filter.trim().is_empty() {
        String::new()
    } else {
        filter_or(&[settings.user_filter.trim().to_string(), filter_or(&containers)])
    };
    let advanced = if settings.advanced_features {
        String::new()
    } else {
        filter_not(&filter_equals(ATTRIBUTE_SHOW_IN_ADVANCED_VIEW_ONLY, "TRUE"))
    };
    filter_and(&[visible, advanced])
}

/// Derives what dropping `dragged` onto `target` would do.
pub fn object_drop_type(ctx: &BehaviorContext<'_>, dragged: ItemId, target: ItemId) -> DropAction {
    let (Some(dragged_dn), Some(target_dn)) =
        (ctx.store.source_key(dragged), ctx.store.source_key(target))
    else {
        return DropAction::None;
    };
    if dn_equals(dragged_dn, target_dn) || is_descendant_of(target_dn, dragged_dn) {
        return DropAction::None;
    }
    let already_child = dn_equals(&parent_dn(dragged_dn), target_dn);

    let dragged_classes = ctx.classes_of(dragged);
    let target_classes = ctx.classes_of(target);
    let has = |classes: &BTreeSet<String>, class: &str| {
        classes.iter().any(|value| value.eq_ignore_ascii_case(class))
    };

    let dragged_is_member = has(&dragged_classes, CLASS_USER) || has(&dragged_classes, CLASS_GROUP);
    if dragged_is_member && has(&target_classes, CLASS_GROUP) {
        DropAction::AddMembership
    } else if !already_child
        && ctx
            .settings
            .schema
            .is_valid_superior(&dragged_classes, &target_classes)
    {
        DropAction::Move
    } else {
        DropAction::None
    }
}

/// Display data of one directory object.
pub fn object_item_data(entry: &Entry) -> ItemData {
    let name = entry.display_name();
    let description = entry.get_string(ATTRIBUTE_DESCRIPTION).unwrap_or_default();

    let mut attributes = BTreeMap::new();
    attributes.insert(Role::ObjectClasses, classes_value(entry));
    if entry.is_class(CLASS_USER) {
        attributes.insert(Role::AccountDisabled, Value::Bool(entry.account_disabled()));
    }
    if !description.is_empty() {
        attributes.insert(Role::Description, Value::Text(description.to_string()));
    }

    ItemData {
        source_key: Some(entry.dn.clone()),
        columns: vec![
            name.clone(),
            entry.primary_class().unwrap_or_default().to_string(),
            description.to_string(),
        ],
        display_name: name,
        attributes,
    }
}

impl ObjectBehavior {
    fn plan(&self, ctx: &BehaviorContext<'_>, entry: &Entry) -> PlannedItem {
        let placement = if ctx.settings.should_be_in_scope(&entry.object_classes) {
            Placement::Buddy
        } else {
            Placement::ResultsOnly
        };
        PlannedItem::new(NodeType::DomainObject, object_item_data(entry), placement)
    }

    fn drop_one(
        &self,
        ctx: &BehaviorContext<'_>,
        dragged: ItemId,
        target: ItemId,
        execution: &mut DropExecution,
    ) -> DropItemResult {
        let action = object_drop_type(ctx, dragged, target);
        let source_key = ctx.store.source_key(dragged).map(str::to_string);
        let result = |outcome| DropItemResult {
            item: dragged,
            source_key: source_key.clone(),
            action,
            outcome,
        };
        let (Some(dragged_dn), Some(target_dn)) =
            (source_key.as_deref(), ctx.store.source_key(target))
        else {
            return result(DropOutcome::Rejected("item has no directory identity".to_string()));
        };

        match action {
            DropAction::None | DropAction::LinkPolicy => result(DropOutcome::Rejected(format!(
                "cannot drop {dragged_dn} onto {target_dn}"
            ))),
            DropAction::AddMembership => match ctx.directory.add_member(target_dn, dragged_dn) {
                Ok(()) => {
                    if let Ok(entry) = ctx.directory.get(dragged_dn) {
                        execution.patches.push(StorePatch::Update {
                            item: dragged,
                            data: object_item_data(&entry),
                        });
                    }
                    result(DropOutcome::Applied)
                }
                Err(err) => result(DropOutcome::Failed(err.to_string())),
            },
            DropAction::Move => match ctx.directory.move_object(dragged_dn, target_dn) {
                Ok(new_dn) => {
                    self.reflect_move(ctx, dragged, dragged_dn, &new_dn, target, execution);
                    result(DropOutcome::Applied)
                }
                Err(err) => result(DropOutcome::Failed(err.to_string())),
            },
        }
    }

    /// New item goes in first, then the old one is removed. An unchanged DN
    /// leaves the store alone.
    fn reflect_move(
        &self,
        ctx: &BehaviorContext<'_>,
        dragged: ItemId,
        old_dn: &str,
        new_dn: &str,
        target: ItemId,
        execution: &mut DropExecution,
    ) {
        if dn_equals(old_dn, new_dn) {
            return;
        }
        let moved = ctx.directory.get(new_dn).ok();
        if let Some(entry) = moved.as_ref() {
            if let Some(parent) = ctx.store.scope_node_of(target).and_then(|id| ctx.store.node(id)) {
                execution.patches.push(StorePatch::Insert {
                    parent: parent.id,
                    items: self.plan_children(ctx, parent, vec![entry.clone()]),
                });
            }
            if entry.is_class(CLASS_OU) {
                if let Some(target_dn) = ctx.store.source_key(target) {
                    for item in ctx.store.find_by_key(target_dn, &[NodeType::PolicyOrgUnit]) {
                        if let Some(node) = item.as_node() {
                            execution.patches.push(StorePatch::Insert {
                                parent: node,
                                items: vec![policy_ou::planned_ou(entry)],
                            });
                        }
                    }
                }
            }
        }

        execution.patches.push(StorePatch::Remove(dragged));
        for item in ctx.store.find_by_key(old_dn, &[]) {
            if item != dragged && ctx.store.buddy_of(dragged) != Some(item) {
                execution.patches.push(StorePatch::Remove(item));
            }
        }
    }
}

impl NodeBehavior for ObjectBehavior {
    fn node_type(&self) -> NodeType {
        NodeType::DomainObject
    }

    fn item_data(&self, _ctx: &BehaviorContext<'_>, entry: &Entry) -> ItemData {
        object_item_data(entry)
    }

    fn plan_children(
        &self,
        ctx: &BehaviorContext<'_>,
        _parent: &Node,
        entries: Vec<Entry>,
    ) -> Vec<PlannedItem> {
        entries.iter().map(|entry| self.plan(ctx, entry)).collect()
    }

    fn fetch(&self, ctx: &BehaviorContext<'_>, node: &Node) -> DirectoryResult<Vec<PlannedItem>> {
        let Some(dn) = node.source_key.as_deref() else {
            return Ok(Vec::new());
        };
        let request = SearchRequest::new(dn, SearchScope::Children, children_filter(ctx.settings));
        let results = ctx.directory.search(&request)?;
        Ok(self.plan_children(ctx, node, results.into_values().collect()))
    }

    /// Multi-item drops are accepted as long as every dragged item is an
    /// object; single drops need a concrete action.
    fn can_drop(&self, ctx: &BehaviorContext<'_>, request: &DropRequest<'_>) -> bool {
        let all_objects = request.dragged_types.len() == 1
            && request.dragged_types.contains(&NodeType::DomainObject);
        if !all_objects {
            return false;
        }
        match request.dragged {
            [single] => object_drop_type(ctx, *single, request.target) != DropAction::None,
            _ => true,
        }
    }

    fn execute_drop(
        &self,
        ctx: &BehaviorContext<'_>,
        request: &DropRequest<'_>,
    ) -> DropExecution {
        let mut execution = DropExecution::default();
        for dragged in request.dragged {
            let result = self.drop_one(ctx, *dragged, request.target, &mut execution);
            execution.results.push(result);
        }
        execution
    }

    fn custom_actions(&self, ctx: &BehaviorContext<'_>, selection: &[ItemId]) -> Vec<CustomAction> {
        let classes: Vec<BTreeSet<String>> =
            selection.iter().map(|item| ctx.classes_of(*item)).collect();
        let has = |classes: &BTreeSet<String>, class: &str| {
            classes.iter().any(|value| value.eq_ignore_ascii_case(class))
        };
        let disabled: Vec<bool> = selection
            .iter()
            .map(|item| {
                ctx.store
                    .attribute(*item, Role::AccountDisabled)
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .collect();

        let mut out = Vec::new();
        if let [single] = classes.as_slice() {
            if ctx.settings.schema.is_container(single) {
                out.push(CustomAction::new(ActionId::NewUser, "New user"));
                out.push(CustomAction::new(ActionId::NewComputer, "New computer"));
                if has(single, CLASS_OU) || has(single, CLASS_DOMAIN) {
                    out.push(CustomAction::new(ActionId::NewOu, "New organizational unit"));
                }
                out.push(CustomAction::new(ActionId::NewGroup, "New group"));
                out.push(CustomAction::new(ActionId::Find, "Find"));
            }
        }

        let all_members = !classes.is_empty()
            && classes
                .iter()
                .all(|classes| has(classes, CLASS_USER) || has(classes, CLASS_GROUP));
        if all_members {
            out.push(CustomAction::new(ActionId::AddToGroup, "Add to group"));
        }

        let all_accounts = !classes.is_empty() && classes.iter().all(|classes| has(classes, CLASS_USER));
        if all_accounts {
            if disabled.iter().any(|value| *value) {
                out.push(CustomAction::new(ActionId::EnableAccount, "Enable account"));
            }
            if disabled.iter().any(|value| !*value) {
                out.push(CustomAction::new(ActionId::DisableAccount, "Disable account"));
            }
            if let [single] = classes.as_slice() {
                if !has(single, CLASS_COMPUTER) {
                    out.push(CustomAction::new(ActionId::ResetPassword, "Reset password"));
                }
            }
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
        let includes_head = selection.iter().any(|item| ctx.is_domain_head(*item));
        if selection.len() == 1 {
            out.insert(StandardAction::Properties);
            if !includes_head {
                out.insert(StandardAction::Rename);
            }
        }
        if !includes_head {
            out.insert(StandardAction::Delete);
        }
        if refresh_if_fetched(ctx, selection) {
            out.insert(StandardAction::Refresh);
        }
        out
    }

    fn column_labels(&self) -> Vec<&'static str> {
        vec!["Name", "Class", "Description"]
    }

    fn default_columns(&self) -> Vec<usize> {
        vec![0, 1, 2]
    }
}

#[cfg(test)]
mod tests {
    use super::{children_filter, object_item_data};
    use crate::config::BrowserSettings;
    use crate::directory::filter::Filter;
    use crate::model::entry::Entry;
    use crate::model::node::{Role, Value};

    #[test]
    fn children_filter_keeps_containers_when_user_filter_is_set() {
        let mut settings = BrowserSettings::for_domain("DC=x");
        settings.user_filter = "(objectClass=group)".to_string();
        let filter = Filter::parse(&children_filter(&settings)).unwrap();

        let ou = Entry::new("OU=a,DC=x", ["top", "organizationalUnit"]);
        let group = Entry::new("CN=g,DC=x", ["top", "group"]);
        let user = Entry::new("CN=u,DC=x", ["top", "user"]);
        let hidden = Entry::new("CN=h,DC=x", ["top", "group"])
            .with_attribute("showInAdvancedViewOnly", "TRUE");

        assert!(filter.matches(&ou));
        assert!(filter.matches(&group));
        assert!(!filter.matches(&user));
        assert!(!filter.matches(&hidden));
    }

    #[test]
    fn advanced_features_show_hidden_objects() {
        let mut settings = BrowserSettings::for_domain("DC=x");
        settings.advanced_features = true;
        let filter = Filter::parse(&children_filter(&settings)).unwrap();
        let hidden = Entry::new("CN=h,DC=x", ["top", "container"])
            .with_attribute("showInAdvancedViewOnly", "TRUE");
        assert!(filter.matches(&hidden));
    }

    #[test]
    fn item_data_carries_classes_and_account_state() {
        let entry = Entry::new("CN=u,DC=x", ["top", "person", "user"])
            .with_attribute("userAccountControl", "514")
            .with_attribute("description", "ops");
        let data = object_item_data(&entry);
        assert_eq!(data.source_key.as_deref(), Some("CN=u,DC=x"));
        assert_eq!(data.columns, vec!["u", "user", "ops"]);
        assert_eq!(data.attributes.get(&Role::AccountDisabled), Some(&Value::Bool(true)));
        assert!(data
            .attributes
            .get(&Role::ObjectClasses)
            .is_some_and(|value| value.matches(&Value::Text("USER".to_string()))));
    }
}
