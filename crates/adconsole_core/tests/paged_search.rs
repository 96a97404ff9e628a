mod common;

use adconsole_core::db::open_db_in_memory;
use adconsole_core::directory::{
    DirectoryResult, DirectoryService, NewObjectKind, PageCookie, SearchRequest, SearchResults,
    SqliteDirectory,
};
use adconsole_core::{search_all_pages, BrowserController, DirectoryError, Entry, SearchScope};
use common::{seed, settings, DOMAIN};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Serves fixed pages and raises `stop` while serving `stop_on_page`.
struct ScriptedPages<'a> {
    pages: Vec<Vec<Entry>>,
    stop: &'a AtomicBool,
    stop_on_page: usize,
    served: Cell<usize>,
}

impl<'a> ScriptedPages<'a> {
    fn new(stop: &'a AtomicBool, stop_on_page: usize) -> Self {
        let page = |names: &[&str]| {
            names
                .iter()
                .map(|name| Entry::new(format!("CN={name},{DOMAIN}"), ["top", "user"]))
                .collect()
        };
        Self {
            pages: vec![
                page(&["a1", "a2"]),
                page(&["b1", "b2"]),
                page(&["c1", "c2"]),
            ],
            stop,
            stop_on_page,
            served: Cell::new(0),
        }
    }
}

impl DirectoryService for ScriptedPages<'_> {
    fn search(&self, _request: &SearchRequest) -> DirectoryResult<SearchResults> {
        Err(DirectoryError::NotConnected)
    }

    fn search_paged(
        &self,
        _request: &SearchRequest,
        cookie: &mut PageCookie,
        out: &mut SearchResults,
    ) -> DirectoryResult<()> {
        let index = usize::try_from(cookie.offset()).unwrap_or(usize::MAX);
        let page = self
            .pages
            .get(index)
            .ok_or_else(|| DirectoryError::InvalidData(format!("no page {index}")))?;
        self.served.set(self.served.get() + 1);
        if index == self.stop_on_page {
            self.stop.store(true, Ordering::SeqCst);
        }
        for entry in page {
            out.insert(entry.dn.clone(), entry.clone());
        }
        if index + 1 < self.pages.len() {
            cookie.set_next_page(index as u64 + 1);
        } else {
            cookie.set_done();
        }
        Ok(())
    }

    fn get(&self, dn: &str) -> DirectoryResult<Entry> {
        Err(DirectoryError::NotFound(dn.to_string()))
    }

    fn create(&self, _name: &str, _parent_dn: &str, _kind: NewObjectKind) -> DirectoryResult<String> {
        Err(DirectoryError::NotConnected)
    }

    fn delete(&self, _dn: &str) -> DirectoryResult<()> {
        Err(DirectoryError::NotConnected)
    }

    fn move_object(&self, _dn: &str, _new_parent_dn: &str) -> DirectoryResult<String> {
        Err(DirectoryError::NotConnected)
    }

    fn rename(&self, _dn: &str, _new_name: &str) -> DirectoryResult<String> {
        Err(DirectoryError::NotConnected)
    }

    fn modify_attribute(&self, _dn: &str, _name: &str, _values: &[String]) -> DirectoryResult<()> {
        Err(DirectoryError::NotConnected)
    }

    fn add_member(&self, _group_dn: &str, _member_dn: &str) -> DirectoryResult<()> {
        Err(DirectoryError::NotConnected)
    }

    fn remove_member(&self, _group_dn: &str, _member_dn: &str) -> DirectoryResult<()> {
        Err(DirectoryError::NotConnected)
    }
}

fn request() -> SearchRequest {
    SearchRequest::new(DOMAIN, SearchScope::Subtree, "(objectClass=user)")
}

#[test]
fn stop_during_second_page_keeps_the_first_two_pages() {
    let stop = AtomicBool::new(false);
    let directory = ScriptedPages::new(&stop, 1);

    let results = search_all_pages(&directory, &request(), &stop).unwrap();

    let names: Vec<String> = results.values().map(Entry::display_name).collect();
    assert_eq!(names, vec!["a1", "a2", "b1", "b2"]);
    assert_eq!(directory.served.get(), 2);
}

#[test]
fn search_without_stop_reads_every_page() {
    let stop = AtomicBool::new(false);
    let directory = ScriptedPages::new(&stop, usize::MAX);

    let results = search_all_pages(&directory, &request(), &stop).unwrap();

    assert_eq!(results.len(), 6);
    assert_eq!(directory.served.get(), 3);
}

#[test]
fn stop_on_the_last_page_still_completes() {
    let stop = AtomicBool::new(false);
    let directory = ScriptedPages::new(&stop, 2);

    let results = search_all_pages(&directory, &request(), &stop).unwrap();

    assert_eq!(results.len(), 6);
}

#[test]
fn stop_raised_before_the_search_still_reads_one_page() {
    let stop = AtomicBool::new(true);
    let directory = ScriptedPages::new(&stop, usize::MAX);

    let results = search_all_pages(&directory, &request(), &stop).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(directory.served.get(), 1);
}

#[test]
fn sqlite_pages_are_joined_in_order() {
    let conn = open_db_in_memory().unwrap();
    let directory = SqliteDirectory::try_new(&conn).unwrap().with_page_size(2);
    seed(&directory);
    let stop = AtomicBool::new(false);

    let results = search_all_pages(
        &directory,
        &SearchRequest::new(DOMAIN, SearchScope::Subtree, ""),
        &stop,
    )
    .unwrap();

    assert_eq!(results.len(), 11);
    assert!(results.keys().any(|dn| dn.eq_ignore_ascii_case(DOMAIN)));
}

#[test]
fn controller_find_resets_an_earlier_stop() {
    let conn = open_db_in_memory().unwrap();
    let directory = SqliteDirectory::try_new(&conn).unwrap().with_page_size(1);
    seed(&directory);
    let controller = BrowserController::new(directory, settings()).unwrap();

    controller.stop_search();
    let users = controller
        .find_objects(DOMAIN, "(objectClass=user)")
        .unwrap();

    let mut names: Vec<String> = users.iter().map(Entry::display_name).collect();
    names.sort();
    assert_eq!(names, vec!["Alice", "Bob"]);
}
