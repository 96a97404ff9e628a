//! Directory service collaborator contract.
//!
//! # Responsibility
//! - Define the operations the browser consumes from a directory service.
//! - Provide the stop-aware paged search loop shared by every caller.
//!
//! # Invariants
//! - Keys are distinguished names compared case-insensitively.
//! - A stop request never aborts a page already in flight; it only prevents
//!   the next page from being requested.

use crate::db::DbError;
use crate::model::entry::{
    Entry, CLASS_COMPUTER, CLASS_CONTAINER, CLASS_GP_CONTAINER, CLASS_GROUP, CLASS_ORG_PERSON,
    CLASS_OU, CLASS_PERSON, CLASS_TOP, CLASS_USER,
};
use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub mod filter;
pub mod sqlite;

pub use sqlite::SqliteDirectory;

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Result map of one search, keyed by DN.
pub type SearchResults = BTreeMap<String, Entry>;

/// Errors reported by a directory service.
#[derive(Debug)]
pub enum DirectoryError {
    /// Service is unreachable or no session is open.
    NotConnected,
    /// Object does not exist.
    NotFound(String),
    /// Object with the same DN already exists.
    AlreadyExists(String),
    /// Operation rejected by schema or structure rules.
    ValidationFailed(String),
    /// Filter string could not be parsed.
    InvalidFilter { filter: String, message: String },
    /// Stored or supplied data is malformed.
    InvalidData(String),
    /// Storage backend failure.
    Db(DbError),
}

impl Display for DirectoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "directory service is not connected"),
            Self::NotFound(dn) => write!(f, "directory object not found: {dn}"),
            Self::AlreadyExists(dn) => write!(f, "directory object already exists: {dn}"),
            Self::ValidationFailed(message) => write!(f, "operation rejected: {message}"),
            Self::InvalidFilter { filter, message } => {
                write!(f, "invalid filter `{filter}`: {message}")
            }
            Self::InvalidData(message) => write!(f, "invalid directory data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DirectoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for DirectoryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}

/// Search depth relative to the base DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base object only.
    Object,
    /// Direct children of the base.
    Children,
    /// The base and everything below it.
    Subtree,
    /// Everything below the base, excluding the base itself.
    All,
}

impl SearchScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Children => "children",
            Self::Subtree => "subtree",
            Self::All => "all",
        }
    }
}

/// One search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Attributes to return. Empty returns every attribute.
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

/// Continuation state of a paged search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCookie {
    offset: u64,
    more: bool,
}

impl PageCookie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the server reported another page.
    pub fn more_pages(&self) -> bool {
        self.more
    }

    /// Backend-defined position of the next page.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Records that another page starts at `offset`.
    pub fn set_next_page(&mut self, offset: u64) {
        self.offset = offset;
        self.more = true;
    }

    /// Records that the last page was delivered.
    pub fn set_done(&mut self) {
        self.more = false;
    }
}

/// Kind of object created through [`DirectoryService::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewObjectKind {
    User,
    Computer,
    OrganizationalUnit,
    Group,
    /// Group policy container; `name` becomes its display name.
    Policy,
}

impl NewObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Computer => "computer",
            Self::OrganizationalUnit => "ou",
            Self::Group => "group",
            Self::Policy => "policy",
        }
    }

    /// Object classes written for a new object of this kind.
    pub fn object_classes(self) -> &'static [&'static str] {
        match self {
            Self::User => &[CLASS_TOP, CLASS_PERSON, CLASS_ORG_PERSON, CLASS_USER],
            Self::Computer => &[
                CLASS_TOP,
                CLASS_PERSON,
                CLASS_ORG_PERSON,
                CLASS_USER,
                CLASS_COMPUTER,
            ],
            Self::OrganizationalUnit => &[CLASS_TOP, CLASS_OU],
            Self::Group => &[CLASS_TOP, CLASS_GROUP],
            Self::Policy => &[CLASS_TOP, CLASS_CONTAINER, CLASS_GP_CONTAINER],
        }
    }

    /// RDN attribute used for objects of this kind.
    pub fn naming_attribute(self) -> &'static str {
        match self {
            Self::OrganizationalUnit => "OU",
            _ => "CN",
        }
    }
}

impl Display for NewObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations consumed from the directory service.
///
/// Calls are blocking from the caller's point of view.
pub trait DirectoryService {
    /// Returns whether a session is open.
    fn is_connected(&self) -> bool {
        true
    }

    /// Runs one unpaged search.
    fn search(&self, request: &SearchRequest) -> DirectoryResult<SearchResults>;

    /// Fetches the page addressed by `cookie` into `out` and advances `cookie`.
    fn search_paged(
        &self,
        request: &SearchRequest,
        cookie: &mut PageCookie,
        out: &mut SearchResults,
    ) -> DirectoryResult<()>;

    /// Reads one object.
    fn get(&self, dn: &str) -> DirectoryResult<Entry>;

    /// Creates an object under `parent_dn` and returns its DN.
    fn create(&self, name: &str, parent_dn: &str, kind: NewObjectKind) -> DirectoryResult<String>;

    /// Deletes a leaf object.
    fn delete(&self, dn: &str) -> DirectoryResult<()>;

    /// Moves an object and returns its new DN.
    fn move_object(&self, dn: &str, new_parent_dn: &str) -> DirectoryResult<String>;

    /// Renames an object and returns its new DN.
    fn rename(&self, dn: &str, new_name: &str) -> DirectoryResult<String>;

    /// Replaces all values of one attribute. An empty list clears it.
    fn modify_attribute(&self, dn: &str, name: &str, values: &[String]) -> DirectoryResult<()>;

    fn add_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()>;

    fn remove_member(&self, group_dn: &str, member_dn: &str) -> DirectoryResult<()>;
}

/// Runs a paged search until the last page or until `stop` is raised.
///
/// `stop` is checked between pages; a page in flight always completes and
/// its entries are kept.
pub fn search_all_pages(
    directory: &dyn DirectoryService,
    request: &SearchRequest,
    stop: &AtomicBool,
) -> DirectoryResult<SearchResults> {
    let started_at = Instant::now();
    let mut cookie = PageCookie::new();
    let mut results = SearchResults::new();
    let mut pages = 0_u32;

    loop {
        if let Err(err) = directory.search_paged(request, &mut cookie, &mut results) {
            warn!(
                "event=paged_search module=directory status=error base={} pages={} error={}",
                request.base, pages, err
            );
            return Err(err);
        }
        pages += 1;

        if !cookie.more_pages() {
            break;
        }
        if stop.load(Ordering::SeqCst) {
            info!(
                "event=paged_search module=directory status=skip reason=stopped base={} pages={}",
                request.base, pages
            );
            return Ok(results);
        }
    }

    info!(
        "event=paged_search module=directory status=ok base={} scope={} pages={} results={} duration_ms={}",
        request.base,
        request.scope.as_str(),
        pages,
        results.len(),
        started_at.elapsed().as_millis()
    );
    Ok(results)
}
