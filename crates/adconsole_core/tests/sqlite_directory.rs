mod common;

use adconsole_core::db::open_db_in_memory;
use adconsole_core::directory::{DirectoryService, NewObjectKind, SqliteDirectory};
use adconsole_core::{DirectoryError, SearchRequest, SearchScope};
use common::{seeded_directory, ALICE, BOB, DOMAIN, ENGINEERING, POLICIES, SALES, STAFF, USERS};

fn children(directory: &SqliteDirectory<'_>, base: &str, filter: &str) -> Vec<String> {
    directory
        .search(&SearchRequest::new(base, SearchScope::Children, filter))
        .unwrap()
        .into_keys()
        .collect()
}

#[test]
fn lookups_ignore_dn_case() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    let entry = directory.get("cn=alice,ou=SALES,dc=example,dc=com").unwrap();

    assert_eq!(entry.dn, ALICE);
    assert!(matches!(
        directory.get("CN=Nobody,DC=example,DC=com"),
        Err(DirectoryError::NotFound(_))
    ));
}

#[test]
fn search_scopes_and_filters() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    assert_eq!(
        children(&directory, SALES, ""),
        vec![ALICE, BOB, STAFF]
    );
    assert_eq!(children(&directory, SALES, "(objectClass=group)"), vec![STAFF]);

    let object = directory
        .search(&SearchRequest::new(SALES, SearchScope::Object, ""))
        .unwrap();
    assert_eq!(object.keys().collect::<Vec<_>>(), vec![SALES]);

    let disabled = directory
        .search(&SearchRequest::new(
            DOMAIN,
            SearchScope::Subtree,
            "(userAccountControl:1.2.840.113556.1.4.803:=2)",
        ))
        .unwrap();
    assert_eq!(disabled.keys().collect::<Vec<_>>(), vec![BOB]);

    let projected = directory
        .search(&SearchRequest::new(STAFF, SearchScope::Object, "").with_attributes(["name"]))
        .unwrap();
    let staff = &projected[STAFF];
    assert_eq!(staff.get_string("name"), Some("Staff"));
    assert!(!staff.has_attribute("description"));
}

#[test]
fn all_scope_excludes_the_base() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    let subtree = directory
        .search(&SearchRequest::new(SALES, SearchScope::Subtree, ""))
        .unwrap();
    let all = directory
        .search(&SearchRequest::new(SALES, SearchScope::All, ""))
        .unwrap();

    assert_eq!(subtree.len(), 4);
    assert_eq!(all.len(), 3);
    assert!(!all.contains_key(SALES));
}

#[test]
fn malformed_filter_and_missing_base_are_errors() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    assert!(matches!(
        directory.search(&SearchRequest::new(DOMAIN, SearchScope::Subtree, "(name=")),
        Err(DirectoryError::InvalidFilter { .. })
    ));
    assert!(matches!(
        directory.search(&SearchRequest::new(
            "OU=Gone,DC=example,DC=com",
            SearchScope::Children,
            ""
        )),
        Err(DirectoryError::NotFound(_))
    ));
}

#[test]
fn create_checks_superiors_and_duplicates() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    let carol = directory.create("Carol", SALES, NewObjectKind::User).unwrap();
    assert_eq!(carol, "CN=Carol,OU=Sales,DC=example,DC=com");
    let entry = directory.get(&carol).unwrap();
    assert!(entry.is_class("user"));
    assert_eq!(entry.get_string("sAMAccountName"), Some("Carol"));
    assert!(!entry.account_disabled());

    assert!(matches!(
        directory.create("Carol", SALES, NewObjectKind::User),
        Err(DirectoryError::AlreadyExists(_))
    ));
    assert!(matches!(
        directory.create("Nested", USERS, NewObjectKind::OrganizationalUnit),
        Err(DirectoryError::ValidationFailed(_))
    ));
    assert!(matches!(
        directory.create("Inside", ALICE, NewObjectKind::Group),
        Err(DirectoryError::ValidationFailed(_))
    ));
    assert!(matches!(
        directory.create("   ", SALES, NewObjectKind::Group),
        Err(DirectoryError::ValidationFailed(_))
    ));
}

#[test]
fn created_policy_gets_a_guid_name() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    let first = directory
        .create("Lockdown", POLICIES, NewObjectKind::Policy)
        .unwrap();
    let second = directory
        .create("Lockdown", POLICIES, NewObjectKind::Policy)
        .unwrap();

    assert_ne!(first, second);
    assert!(first.starts_with("CN={") && first.ends_with(POLICIES));
    let policy = directory.get(&first).unwrap();
    assert_eq!(policy.get_string("displayName"), Some("Lockdown"));
    assert!(policy.is_class("groupPolicyContainer"));
}

#[test]
fn only_leaves_can_be_deleted() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);
    directory.add_member(STAFF, ALICE).unwrap();

    assert!(matches!(
        directory.delete(SALES),
        Err(DirectoryError::ValidationFailed(_))
    ));
    directory.delete(ALICE).unwrap();

    assert!(matches!(directory.get(ALICE), Err(DirectoryError::NotFound(_))));
    assert!(directory.get(STAFF).unwrap().get_values("member").is_empty());
    assert!(matches!(
        directory.delete(ALICE),
        Err(DirectoryError::NotFound(_))
    ));
}

#[test]
fn moving_an_ou_rebases_its_subtree_and_references() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);
    directory.add_member(STAFF, ALICE).unwrap();

    let moved = directory.move_object(SALES, ENGINEERING).unwrap();

    assert_eq!(moved, "OU=Sales,OU=Engineering,DC=example,DC=com");
    let new_alice = "CN=Alice,OU=Sales,OU=Engineering,DC=example,DC=com";
    let new_staff = "CN=Staff,OU=Sales,OU=Engineering,DC=example,DC=com";
    assert!(directory.get(new_alice).is_ok());
    assert!(matches!(directory.get(ALICE), Err(DirectoryError::NotFound(_))));
    assert_eq!(
        directory.get(new_staff).unwrap().get_values("member"),
        &[new_alice.to_string()]
    );
    assert_eq!(
        directory.get(new_alice).unwrap().get_values("memberOf"),
        &[new_staff.to_string()]
    );
    assert_eq!(children(&directory, &moved, "").len(), 3);
}

#[test]
fn invalid_moves_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    assert!(matches!(
        directory.move_object(SALES, ALICE),
        Err(DirectoryError::ValidationFailed(_))
    ));
    assert!(matches!(
        directory.move_object(DOMAIN, SALES),
        Err(DirectoryError::ValidationFailed(_))
    ));
    assert!(matches!(
        directory.move_object(ENGINEERING, USERS),
        Err(DirectoryError::ValidationFailed(_))
    ));
    assert_eq!(directory.move_object(ALICE, SALES).unwrap(), ALICE);
}

#[test]
fn rename_keeps_the_naming_attribute() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    let renamed = directory.rename(SALES, "Marketing").unwrap();

    assert_eq!(renamed, "OU=Marketing,DC=example,DC=com");
    let entry = directory.get(&renamed).unwrap();
    assert_eq!(entry.get_string("name"), Some("Marketing"));
    assert_eq!(entry.get_string("ou"), Some("Marketing"));
    assert!(directory
        .get("CN=Alice,OU=Marketing,DC=example,DC=com")
        .is_ok());
    assert!(matches!(
        directory.rename(&renamed, "Engineering"),
        Err(DirectoryError::AlreadyExists(_))
    ));
}

#[test]
fn renaming_a_policy_only_changes_its_display_name() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    let dn = directory
        .rename(common::WORKSTATION_POLICY, "Laptops")
        .unwrap();

    assert_eq!(dn, common::WORKSTATION_POLICY);
    assert_eq!(
        directory.get(&dn).unwrap().get_string("displayName"),
        Some("Laptops")
    );
}

#[test]
fn membership_changes_are_mirrored() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    directory.add_member(STAFF, BOB).unwrap();
    assert!(matches!(
        directory.add_member(STAFF, BOB),
        Err(DirectoryError::ValidationFailed(_))
    ));
    assert!(matches!(
        directory.add_member(SALES, BOB),
        Err(DirectoryError::ValidationFailed(_))
    ));
    assert_eq!(
        directory.get(BOB).unwrap().get_values("memberOf"),
        &[STAFF.to_string()]
    );

    directory.remove_member(STAFF, BOB).unwrap();
    assert!(directory.get(STAFF).unwrap().get_values("member").is_empty());
    assert!(directory.get(BOB).unwrap().get_values("memberOf").is_empty());
    assert!(directory.remove_member(STAFF, BOB).is_err());
}

#[test]
fn modify_attribute_replaces_or_clears_values() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);

    directory
        .modify_attribute(STAFF, "description", &["Sales team".to_string()])
        .unwrap();
    assert_eq!(
        directory.get(STAFF).unwrap().get_string("description"),
        Some("Sales team")
    );

    directory.modify_attribute(STAFF, "description", &[]).unwrap();
    assert!(!directory.get(STAFF).unwrap().has_attribute("description"));

    assert!(matches!(
        directory.modify_attribute(STAFF, "objectClass", &["user".to_string()]),
        Err(DirectoryError::ValidationFailed(_))
    ));
}

#[test]
fn disconnected_directory_refuses_every_call() {
    let conn = open_db_in_memory().unwrap();
    let directory = seeded_directory(&conn);
    directory.set_connected(false);

    assert!(!directory.is_connected());
    assert!(matches!(directory.get(SALES), Err(DirectoryError::NotConnected)));
    assert!(matches!(
        directory.search(&SearchRequest::new(DOMAIN, SearchScope::Children, "")),
        Err(DirectoryError::NotConnected)
    ));

    directory.set_connected(true);
    assert!(directory.get(SALES).is_ok());
}

#[test]
fn import_inserts_parents_before_children() {
    let conn = open_db_in_memory().unwrap();
    let directory = SqliteDirectory::try_new(&conn).unwrap();
    let json = r#"[
        {"dn": "CN=Dave,OU=Ops,DC=corp,DC=local", "object_classes": ["top", "user"]},
        {"dn": "OU=Ops,DC=corp,DC=local", "object_classes": ["top", "organizationalUnit"]},
        {"dn": "DC=corp,DC=local", "object_classes": ["top", "domainDNS"],
         "attributes": {"name": ["corp"]}}
    ]"#;

    assert_eq!(directory.import_json(json).unwrap(), 3);
    assert_eq!(
        children(&directory, "OU=Ops,DC=corp,DC=local", ""),
        vec!["CN=Dave,OU=Ops,DC=corp,DC=local"]
    );
    assert!(matches!(
        directory.import_json(json),
        Err(DirectoryError::AlreadyExists(_))
    ));
}
