//! SQLite-backed offline directory.
//!
//! # Responsibility
//! - Serve the [`DirectoryService`] contract from a local snapshot so the
//!   browser can run without a directory server.
//! - Enforce the structural rules a real directory would: superiors on
//!   create/move, leaf-only deletes, subtree DN rewrites.
//!
//! # Invariants
//! - `dn` and `parent_dn` columns compare case-insensitively.
//! - A move or rename rewrites the whole subtree and every `member` /
//!   `memberOf` reference in one transaction.
//! - Paged results are ordered by DN so page boundaries are deterministic.

use crate::config::DirectorySchema;
use crate::db::{latest_version, schema_version};
use crate::directory::filter::Filter;
use crate::directory::{
    DirectoryError, DirectoryResult, DirectoryService, NewObjectKind, PageCookie, SearchRequest,
    SearchResults, SearchScope,
};
use crate::model::dn::{
    dn_equals, dn_move, dn_rename, escape_dn_value, is_descendant_of, parent_dn, rdn,
    rdn_attribute, rebase_dn,
};
use crate::model::entry::{
    Entry, ATTRIBUTE_DISPLAY_NAME, ATTRIBUTE_MEMBER, ATTRIBUTE_MEMBER_OF, ATTRIBUTE_NAME,
    ATTRIBUTE_SAMACCOUNT_NAME, ATTRIBUTE_USER_ACCOUNT_CONTROL, CLASS_GP_CONTAINER, CLASS_GROUP,
};
use log::{info, warn};
use rusqlite::{params, Connection, Params};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 1000;
const UAC_NORMAL_ACCOUNT: &str = "512";
const UAC_WORKSTATION_TRUST_ACCOUNT: &str = "4096";
const GROUP_TYPE_GLOBAL_SECURITY: &str = "-2147483646";

const SELECT_COLUMNS: &str = "SELECT dn, object_classes, attributes FROM directory_entries";

/// Directory service over the `directory_entries` table.
pub struct SqliteDirectory<'conn> {
    conn: &'conn Connection,
    schema: DirectorySchema,
    page_size: usize,
    connected: Cell<bool>,
}

impl<'conn> SqliteDirectory<'conn> {
    /// Creates a directory from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> DirectoryResult<Self> {
        ensure_directory_connection_ready(conn)?;
        Ok(Self {
            conn,
            schema: DirectorySchema::default(),
            page_size: DEFAULT_PAGE_SIZE,
            connected: Cell::new(true),
        })
    }

    /// Replaces the superior rules used to validate create and move.
    pub fn with_schema(mut self, schema: DirectorySchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Simulates a dropped or restored session.
    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    /// Seeds one raw entry without structural validation.
    pub fn insert_entry(&self, entry: &Entry) -> DirectoryResult<()> {
        let dn = entry.dn.trim();
        if dn.is_empty() {
            return Err(DirectoryError::InvalidData("entry dn must not be blank".to_string()));
        }
        if self.exists(dn)? {
            return Err(DirectoryError::AlreadyExists(dn.to_string()));
        }
        let classes: Vec<&String> = entry.object_classes.iter().collect();
        self.conn.execute(
            "INSERT INTO directory_entries (
                dn,
                parent_dn,
                rdn,
                object_classes,
                attributes,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, (strftime('%s', 'now') * 1000), (strftime('%s', 'now') * 1000));",
            params![
                dn,
                parent_dn(dn),
                rdn(dn),
                serde_json::to_string(&classes)?,
                serde_json::to_string(&entry.attributes)?,
            ],
        )?;
        Ok(())
    }

    /// Seeds entries from a JSON array of entries. Returns the number inserted.
    pub fn import_json(&self, json: &str) -> DirectoryResult<usize> {
        let mut entries: Vec<Entry> = serde_json::from_str(json)?;
        entries.sort_by_key(|entry| entry.dn.matches(',').count());

        let tx = self.conn.unchecked_transaction()?;
        for entry in &entries {
            self.insert_entry(entry)?;
        }
        tx.commit()?;

        info!(
            "event=directory_import module=directory status=ok entries={}",
            entries.len()
        );
        Ok(entries.len())
    }

    fn ensure_connected(&self) -> DirectoryResult<()> {
        if self.connected.get() {
            Ok(())
        } else {
            Err(DirectoryError::NotConnected)
        }
    }

    fn exists(&self, dn: &str) -> DirectoryResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM directory_entries WHERE dn = ?1);",
            [dn.trim()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn load(&self, dn: &str) -> DirectoryResult<Entry> {
        self.select("WHERE dn = ?1", [dn.trim()])?
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::NotFound(dn.to_string()))
    }

    fn select<P: Params>(&self, clause: &str, params: P) -> DirectoryResult<Vec<Entry>> {
        let sql = format!("{SELECT_COLUMNS} {clause} ORDER BY dn COLLATE NOCASE;");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(dn, classes, attributes)| -> DirectoryResult<Entry> {
                Ok(Entry {
                    dn,
                    object_classes: serde_json::from_str::<BTreeSet<String>>(&classes)?,
                    attributes: serde_json::from_str::<BTreeMap<String, Vec<String>>>(
                        &attributes,
                    )?,
                })
            })
            .collect()
    }

    fn save(&self, entry: &Entry) -> DirectoryResult<()> {
        let classes: Vec<&String> = entry.object_classes.iter().collect();
        self.conn.execute(
            "UPDATE directory_entries
             SET object_classes = ?1,
                 attributes = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE dn = ?3;",
            params![
                serde_json::to_string(&classes)?,
                serde_json::to_string(&entry.attributes)?,
                entry.dn,
            ],
        )?;
        Ok(())
    }

    fn entries_in_scope(&self, base: &str, scope: SearchScope) -> DirectoryResult<Vec<Entry>> {
        let base = base.trim();
        if !base.is_empty() && !self.exists(base)? {
            return Err(DirectoryError::NotFound(base.to_string()));
        }

        match scope {
            SearchScope::Object => self.select("WHERE dn = ?1", [base]),
            SearchScope::Children => self.select("WHERE parent_dn = ?1", [base]),
            SearchScope::Subtree | SearchScope::All => {
                let candidates = if base.is_empty() {
                    self.select("", [])?
                } else {
                    self.select(
                        "WHERE dn = ?1 OR dn LIKE ?2",
                        params![base, format!("%,{base}")],
                    )?
                };
                let include_base = scope == SearchScope::Subtree;
                Ok(candidates
                    .into_iter()
                    .filter(|entry| {
                        base.is_empty()
                            || is_descendant_of(&entry.dn, base)
                            || (include_base && dn_equals(&entry.dn, base))
                    })
                    .collect())
            }
        }
    }

    fn matching_entries(&self, request: &SearchRequest) -> DirectoryResult<Vec<Entry>> {
        let filter = Filter::parse(&request.filter)?;
        Ok(self
            .entries_in_scope(&request.base, request.scope)?
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .map(|entry| project(entry, &request.attributes))
            .collect())
    }

    fn children_count(&self, dn: &str) -> DirectoryResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM directory_entries WHERE parent_dn = ?1;",
            [dn.trim()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Moves `old_dn` and its subtree to `new_dn`, then fixes references.
    fn rebase_subtree(&self, old_dn: &str, new_dn: &str) -> DirectoryResult<()> {
        for entry in self.entries_in_scope(old_dn, SearchScope::Subtree)? {
            let Some(rebased) = rebase_dn(&entry.dn, old_dn, new_dn) else {
                continue;
            };
            self.conn.execute(
                "UPDATE directory_entries
                 SET dn = ?1,
                     parent_dn = ?2,
                     rdn = ?3,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE dn = ?4;",
                params![rebased, parent_dn(&rebased), rdn(&rebased), entry.dn],
            )?;
        }
        self.rewrite_references(old_dn, Some(new_dn))
    }

    /// Rewrites or drops `member`/`memberOf` values naming `old_dn` or its subtree.
    fn rewrite_references(&self, old_dn: &str, new_dn: Option<&str>) -> DirectoryResult<()> {
        for mut entry in self.select("", [])? {
            let mut changed = false;
            for attribute in [ATTRIBUTE_MEMBER, ATTRIBUTE_MEMBER_OF] {
                let values = entry.get_values(attribute);
                let mut rewritten = Vec::with_capacity(values.len());
                for value in values {
                    match (rebase_dn(value, old_dn, new_dn.unwrap_or_default()), new_dn) {
                        (Some(rebased), Some(_)) => rewritten.push(rebased),
                        (Some(_), None) => {}
                        (None, _) => rewritten.push(value.clone()),
                    }
                }
                if rewritten.as_slice() != values {
                    entry.set_values(attribute, rewritten);
                    changed = true;
                }
            }
            if changed {
                self.save(&entry)?;
            }
        }
        Ok(())
    }

    fn validate_superior(&self, classes: &BTreeSet<String>, parent: &Entry) -> DirectoryResult<()> {
        if self.schema.is_valid_superior(classes, &parent.object_classes) {
            return Ok(());
        }
        Err(DirectoryError::ValidationFailed(format!(
            "{} cannot contain objects of class {}",
            parent.dn,
            classes.iter().cloned().collect::<Vec<_>>().join(",")
        )))
    }

    fn membership_pair(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<(Entry, Entry)> {
        let group = self.load(group_dn)?;
        if !group.is_class(CLASS_GROUP) {
            return Err(DirectoryError::ValidationFailed(format!(
                "{group_dn} is not a group"
            )));
        }
        let member = self.load(member_dn)?;
        Ok((group, member))
    }
}

impl DirectoryService for SqliteDirectory<'_> {
    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn search(&self, request: &SearchRequest) -> DirectoryResult<SearchResults> {
        self.ensure_connected()?;
        Ok(self
            .matching_entries(request)?
            .into_iter()
            .map(|entry| (entry.dn.clone(), entry))
            .collect())
    }

    fn search_paged(
        &self,
        request: &SearchRequest,
        cookie: &mut PageCookie,
        out: &mut SearchResults,
    ) -> DirectoryResult<()> {
        self.ensure_connected()?;
        let entries = self.matching_entries(request)?;
        let start = usize::try_from(cookie.offset())
            .unwrap_or(usize::MAX)
            .min(entries.len());
        let end = start.saturating_add(self.page_size).min(entries.len());

        for entry in &entries[start..end] {
            out.insert(entry.dn.clone(), entry.clone());
        }
        if end < entries.len() {
            cookie.set_next_page(end as u64);
        } else {
            cookie.set_done();
        }
        Ok(())
    }

    fn get(&self, dn: &str) -> DirectoryResult<Entry> {
        self.ensure_connected()?;
        self.load(dn)
    }

    fn create(&self, name: &str, parent_dn: &str, kind: NewObjectKind) -> DirectoryResult<String> {
        self.ensure_connected()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DirectoryError::ValidationFailed(
                "name must not be blank".to_string(),
            ));
        }
        let parent = self.load(parent_dn)?;
        let classes: BTreeSet<String> = kind
            .object_classes()
            .iter()
            .map(|class| class.to_string())
            .collect();
        self.validate_superior(&classes, &parent)?;

        let mut entry = Entry::new(String::new(), classes);
        let rdn_value = match kind {
            NewObjectKind::Policy => {
                let guid = format!("{{{}}}", Uuid::new_v4()).to_ascii_uppercase();
                entry.set_values(ATTRIBUTE_DISPLAY_NAME, vec![name.to_string()]);
                guid
            }
            _ => name.to_string(),
        };
        entry.dn = format!(
            "{}={},{}",
            kind.naming_attribute(),
            escape_dn_value(&rdn_value),
            parent.dn
        );
        if self.exists(&entry.dn)? {
            return Err(DirectoryError::AlreadyExists(entry.dn));
        }

        entry.set_values(ATTRIBUTE_NAME, vec![rdn_value.clone()]);
        entry.set_values(kind.naming_attribute().to_ascii_lowercase(), vec![rdn_value]);
        match kind {
            NewObjectKind::User => {
                entry.set_values(ATTRIBUTE_SAMACCOUNT_NAME, vec![name.to_string()]);
                entry.set_values(
                    ATTRIBUTE_USER_ACCOUNT_CONTROL,
                    vec![UAC_NORMAL_ACCOUNT.to_string()],
                );
            }
            NewObjectKind::Computer => {
                entry.set_values(
                    ATTRIBUTE_SAMACCOUNT_NAME,
                    vec![format!("{}$", name.to_ascii_uppercase())],
                );
                entry.set_values(
                    ATTRIBUTE_USER_ACCOUNT_CONTROL,
                    vec![UAC_WORKSTATION_TRUST_ACCOUNT.to_string()],
                );
            }
            NewObjectKind::Group => {
                entry.set_values(ATTRIBUTE_SAMACCOUNT_NAME, vec![name.to_string()]);
                entry.set_values("groupType", vec![GROUP_TYPE_GLOBAL_SECURITY.to_string()]);
            }
            NewObjectKind::OrganizationalUnit | NewObjectKind::Policy => {}
        }

        self.insert_entry(&entry)?;
        info!(
            "event=create module=directory status=ok kind={} dn={}",
            kind, entry.dn
        );
        Ok(entry.dn)
    }

    fn delete(&self, dn: &str) -> DirectoryResult<()> {
        self.ensure_connected()?;
        let entry = self.load(dn)?;
        if self.children_count(&entry.dn)? > 0 {
            return Err(DirectoryError::ValidationFailed(format!(
                "{} has children",
                entry.dn
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        self.conn
            .execute("DELETE FROM directory_entries WHERE dn = ?1;", [&entry.dn])?;
        self.rewrite_references(&entry.dn, None)?;
        tx.commit()?;

        info!("event=delete module=directory status=ok dn={}", entry.dn);
        Ok(())
    }

    fn move_object(&self, dn: &str, new_parent_dn: &str) -> DirectoryResult<String> {
        self.ensure_connected()?;
        let entry = self.load(dn)?;
        let parent = self.load(new_parent_dn)?;
        if dn_equals(&entry.dn, &parent.dn) || is_descendant_of(&parent.dn, &entry.dn) {
            return Err(DirectoryError::ValidationFailed(format!(
                "cannot move {} under itself",
                entry.dn
            )));
        }
        self.validate_superior(&entry.object_classes, &parent)?;

        let new_dn = dn_move(&entry.dn, &parent.dn);
        if dn_equals(&new_dn, &entry.dn) {
            return Ok(entry.dn);
        }
        if self.exists(&new_dn)? {
            return Err(DirectoryError::AlreadyExists(new_dn));
        }

        let tx = self.conn.unchecked_transaction()?;
        self.rebase_subtree(&entry.dn, &new_dn)?;
        tx.commit()?;

        info!(
            "event=move module=directory status=ok from={} to={}",
            entry.dn, new_dn
        );
        Ok(new_dn)
    }

    fn rename(&self, dn: &str, new_name: &str) -> DirectoryResult<String> {
        self.ensure_connected()?;
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(DirectoryError::ValidationFailed(
                "name must not be blank".to_string(),
            ));
        }
        let mut entry = self.load(dn)?;

        // Policies keep their GUID RDN; only the display name changes.
        if entry.is_class(CLASS_GP_CONTAINER) {
            entry.set_values(ATTRIBUTE_DISPLAY_NAME, vec![new_name.to_string()]);
            self.save(&entry)?;
            return Ok(entry.dn);
        }

        let new_dn = dn_rename(&entry.dn, new_name);
        if !dn_equals(&new_dn, &entry.dn) && self.exists(&new_dn)? {
            return Err(DirectoryError::AlreadyExists(new_dn));
        }

        let tx = self.conn.unchecked_transaction()?;
        if new_dn != entry.dn {
            self.rebase_subtree(&entry.dn, &new_dn)?;
        }
        let mut renamed = self.load(&new_dn)?;
        renamed.set_values(ATTRIBUTE_NAME, vec![new_name.to_string()]);
        renamed.set_values(
            rdn_attribute(&new_dn).to_ascii_lowercase(),
            vec![new_name.to_string()],
        );
        self.save(&renamed)?;
        tx.commit()?;

        info!(
            "event=rename module=directory status=ok from={} to={}",
            entry.dn, new_dn
        );
        Ok(new_dn)
    }

    fn modify_attribute(&self, dn: &str, name: &str, values: &[String]) -> DirectoryResult<()> {
        self.ensure_connected()?;
        if name.eq_ignore_ascii_case("objectClass")
            || name.eq_ignore_ascii_case("distinguishedName")
        {
            return Err(DirectoryError::ValidationFailed(format!(
                "attribute {name} is read-only"
            )));
        }
        let mut entry = self.load(dn)?;
        entry.set_values(name, values.to_vec());
        self.save(&entry)
    }

    fn add_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        self.ensure_connected()?;
        let (mut group, mut member) = self.membership_pair(group_dn, member_dn)?;
        if group
            .get_values(ATTRIBUTE_MEMBER)
            .iter()
            .any(|value| dn_equals(value, &member.dn))
        {
            return Err(DirectoryError::ValidationFailed(format!(
                "{} is already a member of {}",
                member.dn, group.dn
            )));
        }

        let mut members = group.get_values(ATTRIBUTE_MEMBER).to_vec();
        members.push(member.dn.clone());
        group.set_values(ATTRIBUTE_MEMBER, members);
        let mut member_of = member.get_values(ATTRIBUTE_MEMBER_OF).to_vec();
        member_of.push(group.dn.clone());
        member.set_values(ATTRIBUTE_MEMBER_OF, member_of);

        let tx = self.conn.unchecked_transaction()?;
        self.save(&group)?;
        self.save(&member)?;
        tx.commit()?;
        Ok(())
    }

    fn remove_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()> {
        self.ensure_connected()?;
        let (mut group, mut member) = self.membership_pair(group_dn, member_dn)?;
        let members = group.get_values(ATTRIBUTE_MEMBER).to_vec();
        let remaining: Vec<String> = members
            .iter()
            .filter(|value| !dn_equals(value, &member.dn))
            .cloned()
            .collect();
        if remaining.len() == members.len() {
            warn!(
                "event=remove_member module=directory status=skip group={} member={}",
                group.dn, member.dn
            );
            return Err(DirectoryError::ValidationFailed(format!(
                "{} is not a member of {}",
                member.dn, group.dn
            )));
        }
        group.set_values(ATTRIBUTE_MEMBER, remaining);
        let member_of: Vec<String> = member
            .get_values(ATTRIBUTE_MEMBER_OF)
            .iter()
            .filter(|value| !dn_equals(value, &group.dn))
            .cloned()
            .collect();
        member.set_values(ATTRIBUTE_MEMBER_OF, member_of);

        let tx = self.conn.unchecked_transaction()?;
        self.save(&group)?;
        self.save(&member)?;
        tx.commit()?;
        Ok(())
    }
}

/// Keeps only requested attributes. Empty selection keeps everything.
fn project(mut entry: Entry, attributes: &[String]) -> Entry {
    if attributes.is_empty() || attributes.iter().any(|name| name == "*") {
        return entry;
    }
    entry.attributes.retain(|key, _| {
        attributes
            .iter()
            .any(|requested| requested.eq_ignore_ascii_case(key))
    });
    entry
}

fn ensure_directory_connection_ready(conn: &Connection) -> DirectoryResult<()> {
    let expected = latest_version();
    let actual = schema_version(conn)?;
    if actual != expected {
        return Err(DirectoryError::InvalidData(format!(
            "connection schema version {actual} does not match expected {expected}"
        )));
    }
    Ok(())
}
