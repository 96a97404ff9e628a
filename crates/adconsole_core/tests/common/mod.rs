#![allow(dead_code)]

use adconsole_core::directory::{
    DirectoryResult, DirectoryService, NewObjectKind, PageCookie, SearchRequest, SearchResults,
    SqliteDirectory,
};
use adconsole_core::{BrowserSettings, DirectoryError, Entry, ItemId, ItemStore, NodeId};
use rusqlite::Connection;
use std::cell::Cell;

pub const DOMAIN: &str = "DC=example,DC=com";
pub const SALES: &str = "OU=Sales,DC=example,DC=com";
pub const ENGINEERING: &str = "OU=Engineering,DC=example,DC=com";
pub const USERS: &str = "CN=Users,DC=example,DC=com";
pub const ALICE: &str = "CN=Alice,OU=Sales,DC=example,DC=com";
pub const BOB: &str = "CN=Bob,OU=Sales,DC=example,DC=com";
pub const STAFF: &str = "CN=Staff,OU=Sales,DC=example,DC=com";
pub const POLICIES: &str = "CN=Policies,CN=System,DC=example,DC=com";
pub const DEFAULT_POLICY: &str = "CN={P1},CN=Policies,CN=System,DC=example,DC=com";
pub const WORKSTATION_POLICY: &str = "CN={P2},CN=Policies,CN=System,DC=example,DC=com";

/// Small domain: two OUs, one container, three objects in Sales, two policies.
pub fn seed(directory: &SqliteDirectory<'_>) {
    let hidden = |entry: Entry| entry.with_attribute("showInAdvancedViewOnly", "TRUE");
    let entries = vec![
        Entry::new(DOMAIN, ["top", "domainDNS"])
            .with_attribute("name", "example")
            .with_attribute("gPLink", format!("[LDAP://{DEFAULT_POLICY};0]")),
        hidden(Entry::new("CN=System,DC=example,DC=com", ["top", "container"])),
        hidden(Entry::new(POLICIES, ["top", "container"])),
        hidden(
            Entry::new(DEFAULT_POLICY, ["top", "container", "groupPolicyContainer"])
                .with_attribute("displayName", "Default Domain Policy"),
        ),
        hidden(
            Entry::new(WORKSTATION_POLICY, ["top", "container", "groupPolicyContainer"])
                .with_attribute("displayName", "Workstations"),
        ),
        Entry::new(SALES, ["top", "organizationalUnit"]).with_attribute("name", "Sales"),
        Entry::new(ENGINEERING, ["top", "organizationalUnit"])
            .with_attribute("name", "Engineering"),
        Entry::new(USERS, ["top", "container"]).with_attribute("name", "Users"),
        Entry::new(ALICE, ["top", "person", "organizationalPerson", "user"])
            .with_attribute("name", "Alice")
            .with_attribute("userAccountControl", "512"),
        Entry::new(BOB, ["top", "person", "organizationalPerson", "user"])
            .with_attribute("name", "Bob")
            .with_attribute("userAccountControl", "514"),
        Entry::new(STAFF, ["top", "group"])
            .with_attribute("name", "Staff")
            .with_attribute("description", "Sales staff"),
    ];
    for entry in &entries {
        directory.insert_entry(entry).unwrap();
    }
}

pub fn settings() -> BrowserSettings {
    BrowserSettings::for_domain(DOMAIN)
}

pub fn seeded_directory(conn: &Connection) -> SqliteDirectory<'_> {
    let directory = SqliteDirectory::try_new(conn).unwrap();
    seed(&directory);
    directory
}

/// Child node of `parent` with source key `key`.
pub fn child_node(store: &ItemStore, parent: NodeId, key: &str) -> NodeId {
    store
        .children(parent)
        .iter()
        .copied()
        .find(|child| {
            store
                .source_key((*child).into())
                .is_some_and(|value| value.eq_ignore_ascii_case(key))
        })
        .unwrap_or_else(|| panic!("no child node {key}"))
}

/// Row in the listing of `parent` with source key `key`.
pub fn row(store: &ItemStore, parent: NodeId, key: &str) -> ItemId {
    store
        .rows_of(parent)
        .iter()
        .copied()
        .find(|row| {
            store
                .source_key((*row).into())
                .is_some_and(|value| value.eq_ignore_ascii_case(key))
        })
        .map(ItemId::Row)
        .unwrap_or_else(|| panic!("no row {key}"))
}

/// Source keys listed under `parent`, in display order.
pub fn row_keys(store: &ItemStore, parent: NodeId) -> Vec<String> {
    store
        .rows_of(parent)
        .iter()
        .filter_map(|row| store.source_key((*row).into()).map(str::to_string))
        .collect()
}

/// Display names of the child nodes of `parent`, in display order.
pub fn child_names(store: &ItemStore, parent: NodeId) -> Vec<String> {
    store
        .children(parent)
        .iter()
        .filter_map(|child| store.display_name((*child).into()).map(str::to_string))
        .collect()
}

/// Directory double whose searches fail while `fail_searches` is set.
pub struct FlakyDirectory<'conn> {
    pub inner: SqliteDirectory<'conn>,
    pub fail_searches: Cell<bool>,
}

impl<'conn> FlakyDirectory<'conn> {
    pub fn new(inner: SqliteDirectory<'conn>) -> Self {
        Self {
            inner,
            fail_searches: Cell::new(false),
        }
    }

    fn check(&self) -> DirectoryResult<()> {
        if self.fail_searches.get() {
            Err(DirectoryError::InvalidData("search timed out".to_string()))
        } else {
            Ok(())
        }
    }
}

impl DirectoryService for FlakyDirectory<'_> {
    fn search(&self, request: &SearchRequest) -> DirectoryResult<SearchResults> {
        self.check()?;
        self.inner.search(request)
    }

    fn search_paged(
        &self,
        request: &SearchRequest,
        cookie: &mut PageCookie,
        out: &mut SearchResults,
    ) -> DirectoryResult<()> {
        self.check()?;
        self.inner.search_paged(request, cookie, out)
    }

    fn get(&self, dn: &str) -> DirectoryResult<Entry> {
        self.inner.get(dn)
    }

    fn create(&self, name: &str, parent_dn: &str, kind: NewObjectKind) -> DirectoryResult<String> {
        self.inner.create(name, parent_dn, kind)
    }

    fn delete(&self, dn: &str) -> DirectoryResult<()> {
        self.inner.delete(dn)
    }

    fn move_object(&self, dn: &str, new_parent_dn: &str) -> DirectoryResult<String> {
        self.inner.move_object(dn, new_parent_dn)
    }

    fn rename(&self, dn: &str, new_name: &str) -> DirectoryResult<String> {
        self.inner.rename(dn, new_name)
    }

    fn modify_attribute(&self, dn: &str, name: &str, values: &[String]) -> DirectoryResult<()> {
        self.inner.modify_attribute(dn, name, values)
    }

    fn add_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        self.inner.add_member(group_dn, member_dn)
    }

    fn remove_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        self.inner.remove_member(group_dn, member_dn)
    }
}
