mod common;

use adconsole_core::db::open_db_in_memory;
use adconsole_core::directory::{DirectoryService, SearchRequest, SearchScope};
use adconsole_core::{BrowserController, ConsoleEvent, DropAction, DropOutcome, DropPhase};
use common::{
    child_node, row, row_keys, seeded_directory, settings, ALICE, ENGINEERING, SALES, STAFF,
    USERS,
};

#[test]
fn moved_item_appears_once_under_the_loaded_target() {
    let conn = open_db_in_memory().unwrap();
    let mut controller = BrowserController::new(seeded_directory(&conn), settings()).unwrap();
    let domain = controller.go_online().unwrap();
    let sales = child_node(controller.store(), domain, SALES);
    let engineering = child_node(controller.store(), domain, ENGINEERING);
    controller.expand(sales).unwrap();
    controller.expand(engineering).unwrap();
    let alice = row(controller.store(), sales, ALICE);

    assert!(controller.can_drop(&[alice], engineering.into()));
    let report = controller
        .drop_items(vec![alice], engineering.into())
        .unwrap();

    let new_dn = "CN=Alice,OU=Engineering,DC=example,DC=com";
    assert_eq!(report.phase, DropPhase::Applied);
    assert_eq!(report.applied_count(), 1);
    assert_eq!(report.results[0].action, DropAction::Move);

    let store = controller.store();
    assert!(!row_keys(store, sales)
        .iter()
        .any(|key| key.eq_ignore_ascii_case(ALICE)));
    assert_eq!(row_keys(store, engineering), vec![new_dn]);
    assert_eq!(store.find_by_key(new_dn, &[]).len(), 1);
    assert!(store.find_by_key(ALICE, &[]).is_empty());
    assert_eq!(controller.directory().get(new_dn).unwrap().dn, new_dn);
    store.validate().unwrap();
}

#[test]
fn mixed_drop_applies_valid_items_and_rejects_the_rest() {
    let conn = open_db_in_memory().unwrap();
    let mut controller = BrowserController::new(seeded_directory(&conn), settings()).unwrap();
    let domain = controller.go_online().unwrap();
    let sales = child_node(controller.store(), domain, SALES);
    let users = child_node(controller.store(), domain, USERS);
    controller.expand(sales).unwrap();
    controller.expand(users).unwrap();
    let alice = row(controller.store(), sales, ALICE);
    let engineering = row(controller.store(), domain, ENGINEERING);

    // An OU cannot live in a plain container, a user can.
    assert!(controller.can_drop(&[alice, engineering], users.into()));
    let report = controller
        .drop_items(vec![alice, engineering], users.into())
        .unwrap();

    assert_eq!(report.phase, DropPhase::Applied);
    assert!(report.is_partial());
    assert_eq!(report.applied_count(), 1);
    assert_eq!(report.results[0].outcome, DropOutcome::Applied);
    assert!(matches!(report.results[1].outcome, DropOutcome::Rejected(_)));
    assert_eq!(report.results[1].action, DropAction::None);

    let store = controller.store();
    assert_eq!(
        row_keys(store, users),
        vec!["CN=Alice,CN=Users,DC=example,DC=com"]
    );
    assert!(store.find_child_by_key(domain, ENGINEERING).is_some());
    assert!(controller.directory().get(ENGINEERING).is_ok());
}

#[test]
fn rejected_single_drop_changes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let mut controller = BrowserController::new(seeded_directory(&conn), settings()).unwrap();
    let domain = controller.go_online().unwrap();
    let users = child_node(controller.store(), domain, USERS);
    controller.expand(users).unwrap();
    let engineering = row(controller.store(), domain, ENGINEERING);
    controller.take_view_updates();
    let nodes = controller.store().node_count();
    let rows = controller.store().row_count();

    assert!(!controller.can_drop(&[engineering], users.into()));
    let report = controller
        .drop_items(vec![engineering], users.into())
        .unwrap();

    assert_eq!(report.phase, DropPhase::Rejected);
    assert!(report.results.is_empty());
    assert!(report.reason.is_some());
    assert!(controller.take_view_updates().is_empty());
    assert_eq!(controller.store().node_count(), nodes);
    assert_eq!(controller.store().row_count(), rows);
    assert!(controller.directory().get(ENGINEERING).is_ok());
    let under_users = controller
        .directory()
        .search(&SearchRequest::new(USERS, SearchScope::Children, ""))
        .unwrap();
    assert!(under_users.is_empty());
}

#[test]
fn dropping_onto_itself_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let mut controller = BrowserController::new(seeded_directory(&conn), settings()).unwrap();
    let domain = controller.go_online().unwrap();
    let sales = row(controller.store(), domain, SALES);

    let report = controller.drop_items(vec![sales], sales).unwrap();

    assert_eq!(report.phase, DropPhase::Rejected);
    assert!(controller.directory().get(SALES).is_ok());
}

#[test]
fn dropping_onto_the_current_parent_keeps_the_item() {
    let conn = open_db_in_memory().unwrap();
    let mut controller = BrowserController::new(seeded_directory(&conn), settings()).unwrap();
    let domain = controller.go_online().unwrap();
    let sales = child_node(controller.store(), domain, SALES);
    controller.expand(sales).unwrap();
    let alice = row(controller.store(), sales, ALICE);

    assert!(!controller.can_drop(&[alice], sales.into()));
    let report = controller.drop_items(vec![alice], sales.into()).unwrap();

    assert_eq!(report.phase, DropPhase::Rejected);
    assert!(report.results.is_empty());
    assert!(controller.directory().get(ALICE).is_ok());
    assert_eq!(controller.store().find_by_key(ALICE, &[]), vec![alice]);
    controller.store().validate().unwrap();
}

#[test]
fn target_inside_a_multi_item_drop_is_skipped_alone() {
    let conn = open_db_in_memory().unwrap();
    let mut controller = BrowserController::new(seeded_directory(&conn), settings()).unwrap();
    let domain = controller.go_online().unwrap();
    let sales = child_node(controller.store(), domain, SALES);
    controller.expand(sales).unwrap();
    let alice = row(controller.store(), sales, ALICE);
    let users = row(controller.store(), domain, USERS);

    assert!(controller.can_drop(&[alice, users], users));
    let report = controller.drop_items(vec![alice, users], users).unwrap();

    assert_eq!(report.phase, DropPhase::Applied);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].action, DropAction::Move);
    assert_eq!(report.results[0].outcome, DropOutcome::Applied);
    assert_eq!(report.results[1].action, DropAction::None);
    assert!(matches!(report.results[1].outcome, DropOutcome::Rejected(_)));
    assert!(controller
        .directory()
        .get("CN=Alice,CN=Users,DC=example,DC=com")
        .is_ok());
    assert!(controller.store().find_by_key(ALICE, &[]).is_empty());
    assert!(controller.store().contains(users));
    controller.store().validate().unwrap();
}

#[test]
fn dropping_a_user_on_a_group_adds_membership() {
    let conn = open_db_in_memory().unwrap();
    let mut controller = BrowserController::new(seeded_directory(&conn), settings()).unwrap();
    let domain = controller.go_online().unwrap();
    let sales = child_node(controller.store(), domain, SALES);
    controller.expand(sales).unwrap();
    let alice = row(controller.store(), sales, ALICE);
    let staff = row(controller.store(), sales, STAFF);
    controller.drain_events();

    let report = controller.drop_items(vec![alice], staff).unwrap();

    assert_eq!(report.phase, DropPhase::Applied);
    assert_eq!(report.results[0].action, DropAction::AddMembership);
    let group = controller.directory().get(STAFF).unwrap();
    assert!(group
        .get_values("member")
        .iter()
        .any(|member| member.eq_ignore_ascii_case(ALICE)));
    assert!(matches!(
        controller.drain_events().as_slice(),
        [ConsoleEvent::ItemsDropped { dragged, .. }] if dragged == &vec![alice]
    ));

    // A second drop of the same member fails at the directory.
    let report = controller.drop_items(vec![alice], staff).unwrap();
    assert_eq!(report.phase, DropPhase::Rejected);
    assert_eq!(report.failed_count(), 1);
}
