//! Browser controller: the single writer of the item store.
//!
//! # Responsibility
//! - Own the item store, the behavior registry, the drop coordinator and the
//!   view mapping for one session.
//! - Expose the operations applications call and reflect every directory
//!   mutation back into the store.
//!
//! # Invariants
//! - All store mutations go through this type.
//! - A failed fetch leaves the node `NotFetched` with no children added.
//! - Batch operations report per item and never roll back successes.

use crate::behavior::policy_container::{policies_container_dn, POLICY_ROOT_NAME};
use crate::behavior::policy_ou::link_policies;
use crate::behavior::{
    Activation, BehaviorContext, BehaviorRegistry, CustomAction, NodeBehavior, RegistryError,
    StandardAction,
};
use crate::config::{BrowserSettings, ConfigError};
use crate::directory::filter::filter_contains;
use crate::directory::{
    search_all_pages, DirectoryError, DirectoryService, NewObjectKind, SearchRequest,
    SearchScope,
};
use crate::model::dn::{dn_equals, parent_dn};
use crate::model::entry::{
    Entry, ATTRIBUTE_GPLINK, ATTRIBUTE_GPOPTIONS, ATTRIBUTE_USER_ACCOUNT_CONTROL,
    CLASS_GP_CONTAINER, GPOPTIONS_BLOCK_INHERITANCE, GPOPTIONS_INHERIT, UAC_ACCOUNT_DISABLE,
};
use crate::model::gplink::Gplink;
use crate::model::node::{FetchState, ItemData, ItemId, NodeId, NodeType};
use crate::service::drop_coordinator::{DropCoordinator, DropReport};
use crate::service::view_sync::{
    ResultsViewId, ResultsViewSpec, UserInput, ViewCommand, ViewSync, ViewUpdate,
};
use crate::store::{ItemStore, StoreError};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// `userAccountControl` of a plain enabled account.
const UAC_NORMAL_ACCOUNT: i64 = 0x0200;

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Controller-level error taxonomy.
#[derive(Debug)]
pub enum ConsoleError {
    /// Directory service unavailable; nothing was changed.
    NotConnected,
    /// Target vanished between selection and action.
    NotFound(String),
    /// Rejected by schema, settings or drop rules.
    ValidationFailed(String),
    /// Some items of a batch failed; successes are kept.
    PartialFailure {
        succeeded: Vec<String>,
        failed: Vec<(String, String)>,
    },
    Store(StoreError),
    Registry(RegistryError),
    Directory(DirectoryError),
}

impl Display for ConsoleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to the directory service"),
            Self::NotFound(key) => write!(f, "not found: {key}"),
            Self::ValidationFailed(message) => write!(f, "validation failed: {message}"),
            Self::PartialFailure { succeeded, failed } => write!(
                f,
                "{} of {} items failed",
                failed.len(),
                succeeded.len() + failed.len()
            ),
            Self::Store(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Directory(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConsoleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Directory(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DirectoryError> for ConsoleError {
    fn from(value: DirectoryError) -> Self {
        match value {
            DirectoryError::NotConnected => Self::NotConnected,
            DirectoryError::NotFound(dn) => Self::NotFound(dn),
            DirectoryError::ValidationFailed(message) => Self::ValidationFailed(message),
            DirectoryError::AlreadyExists(dn) => {
                Self::ValidationFailed(format!("object already exists: {dn}"))
            }
            other => Self::Directory(other),
        }
    }
}

impl From<StoreError> for ConsoleError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RegistryError> for ConsoleError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<ConfigError> for ConsoleError {
    fn from(value: ConfigError) -> Self {
        Self::ValidationFailed(value.to_string())
    }
}

/// Notification for the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    ScopeChanged(NodeId),
    SelectionChanged(Vec<ItemId>),
    ItemsDropped {
        dragged: Vec<ItemId>,
        target: ItemId,
        report: DropReport,
    },
    FetchFailed {
        node: NodeId,
        message: String,
    },
}

/// Actions available for the current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    pub standard: BTreeSet<StandardAction>,
    pub custom: Vec<CustomAction>,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    succeeded: Vec<String>,
    failed: Vec<(String, String)>,
}

impl BatchOutcome {
    fn finish(self) -> ConsoleResult<Vec<String>> {
        if self.failed.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(ConsoleError::PartialFailure {
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }
}

/// Composition root of one browsing session.
pub struct BrowserController<D: DirectoryService> {
    directory: D,
    settings: BrowserSettings,
    store: ItemStore,
    registry: BehaviorRegistry,
    coordinator: DropCoordinator,
    views: ViewSync,
    current_scope: Option<NodeId>,
    selection: Vec<ItemId>,
    domain_root: Option<NodeId>,
    policy_root: Option<NodeId>,
    events: Vec<ConsoleEvent>,
    stop_search: Arc<AtomicBool>,
}

impl<D: DirectoryService> BrowserController<D> {
    /// Creates a controller with the built-in behaviors.
    pub fn new(directory: D, settings: BrowserSettings) -> ConsoleResult<Self> {
        Self::with_registry(directory, settings, BehaviorRegistry::with_defaults())
    }

    pub fn with_registry(
        directory: D,
        settings: BrowserSettings,
        registry: BehaviorRegistry,
    ) -> ConsoleResult<Self> {
        settings.validate()?;
        let mut views = ViewSync::new();
        for node_type in registry.node_types() {
            let behavior = registry.behavior_for(node_type)?;
            let view = views.register_results_view(
                behavior
                    .column_labels()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                behavior.default_columns(),
            );
            views.assign_results_view(node_type, view);
        }

        Ok(Self {
            directory,
            settings,
            store: ItemStore::new(),
            registry,
            coordinator: DropCoordinator::new(),
            views,
            current_scope: None,
            selection: Vec::new(),
            domain_root: None,
            policy_root: None,
            events: Vec::new(),
            stop_search: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    pub fn current_scope(&self) -> Option<NodeId> {
        self.current_scope
    }

    pub fn domain_root(&self) -> Option<NodeId> {
        self.domain_root
    }

    pub fn policy_root(&self) -> Option<NodeId> {
        self.policy_root
    }

    pub fn selection(&self) -> &[ItemId] {
        &self.selection
    }

    /// Builds the domain and policy roots and selects the domain.
    pub fn go_online(&mut self) -> ConsoleResult<NodeId> {
        self.ensure_connected()?;
        let domain_head = self.settings.domain_head.trim().to_string();
        let head = self.directory.get(&domain_head)?;

        for root in self.store.roots().to_vec() {
            self.store.delete_item(root.into())?;
        }
        self.selection.clear();
        self.current_scope = None;

        let domain_data = self.behavior(NodeType::DomainObject)?.item_data(&self.ctx(), &head);
        let domain_root = self.store.add_root(NodeType::DomainObject, domain_data, 0);
        let policy_data = ItemData {
            source_key: Some(policies_container_dn(&domain_head)),
            ..ItemData::synthetic(POLICY_ROOT_NAME)
        };
        let policy_root = self.store.add_root(NodeType::PolicyContainer, policy_data, 1);
        self.domain_root = Some(domain_root);
        self.policy_root = Some(policy_root);

        info!(
            "event=go_online module=controller status=ok domain={}",
            domain_head
        );
        self.select_scope(domain_root)?;
        Ok(domain_root)
    }

    /// Fetches a `NotFetched` node; other states are left alone.
    pub fn expand(&mut self, node: NodeId) -> ConsoleResult<()> {
        match self.store.fetch_state(node) {
            Some(FetchState::NotFetched) => self.fetch(node).map(|_| ()),
            Some(state) => {
                debug!(
                    "event=expand module=controller status=skip node={} state={}",
                    node, state
                );
                Ok(())
            }
            None => Err(ConsoleError::NotFound(node.to_string())),
        }
    }

    /// Loads the children of a node all-or-nothing and returns their count.
    pub fn fetch(&mut self, node: NodeId) -> ConsoleResult<usize> {
        self.ensure_connected()?;
        let node_type = self
            .store
            .node_type(node.into())
            .ok_or_else(|| ConsoleError::NotFound(node.to_string()))?;
        let behavior = self.behavior(node_type)?;

        let started_at = Instant::now();
        self.store.begin_fetch(node)?;
        let fetched = match self.store.node(node) {
            Some(current) => behavior.fetch(&self.ctx(), current),
            None => Err(DirectoryError::NotFound(node.to_string())),
        };

        match fetched {
            Ok(items) => {
                let count = items.len();
                self.store.commit_fetch(node, items)?;
                self.store.sort(node)?;
                info!(
                    "event=fetch module=controller status=ok node_type={} children={} duration_ms={}",
                    node_type,
                    count,
                    started_at.elapsed().as_millis()
                );
                Ok(count)
            }
            Err(err) => {
                self.store.abort_fetch(node)?;
                warn!(
                    "event=fetch_abort module=controller status=error node_type={} error={}",
                    node_type, err
                );
                self.events.push(ConsoleEvent::FetchFailed {
                    node,
                    message: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    /// Makes `node` the current scope, fetching it on first visit.
    pub fn select_scope(&mut self, node: NodeId) -> ConsoleResult<()> {
        if !self.store.contains(node.into()) {
            return Err(ConsoleError::NotFound(node.to_string()));
        }
        self.current_scope = Some(node);
        self.events.push(ConsoleEvent::ScopeChanged(node));
        self.expand(node)
    }

    /// Discards the children of `node` and fetches them again.
    pub fn refresh(&mut self, node: NodeId) -> ConsoleResult<usize> {
        self.ensure_connected()?;
        self.store.refresh(node)?;
        info!("event=refresh module=controller status=ok node={}", node);
        self.fetch(node)
    }

    pub fn set_selection(&mut self, items: Vec<ItemId>) {
        self.selection = items
            .into_iter()
            .filter(|item| self.store.contains(*item))
            .collect();
        self.events
            .push(ConsoleEvent::SelectionChanged(self.selection.clone()));
    }

    /// Source keys of the selection, without duplicates.
    pub fn get_selected_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for item in &self.selection {
            if let Some(key) = self.store.source_key(*item) {
                if !keys.iter().any(|existing| dn_equals(existing, key)) {
                    keys.push(key.to_string());
                }
            }
        }
        keys
    }

    /// Runs the double-click action of an item.
    pub fn activate(&mut self, item: ItemId) -> ConsoleResult<Activation> {
        let node_type = self
            .store
            .node_type(item)
            .ok_or_else(|| ConsoleError::NotFound(item.to_string()))?;
        let activation = self.behavior(node_type)?.activation(&self.ctx(), item);
        if let Activation::NavigateInto(node) = activation {
            self.select_scope(node)?;
        }
        Ok(activation)
    }

    /// Actions shared by every type in the selection.
    pub fn actions_for_selection(&self) -> ConsoleResult<ActionSet> {
        let mut by_type: BTreeMap<NodeType, Vec<ItemId>> = BTreeMap::new();
        for item in &self.selection {
            if let Some(node_type) = self.store.node_type(*item) {
                by_type.entry(node_type).or_default().push(*item);
            }
        }

        let ctx = self.ctx();
        let mut out: Option<ActionSet> = None;
        for (node_type, items) in by_type {
            let behavior = self.behavior(node_type)?;
            let standard = behavior.standard_actions(&ctx, &items);
            let custom = behavior.custom_actions(&ctx, &items);
            out = Some(match out {
                None => ActionSet { standard, custom },
                Some(previous) => ActionSet {
                    standard: previous.standard.intersection(&standard).copied().collect(),
                    custom: previous
                        .custom
                        .into_iter()
                        .filter(|action| custom.iter().any(|other| other.id == action.id))
                        .collect(),
                },
            });
        }
        Ok(out.unwrap_or_default())
    }

    /// Deletes objects and returns the keys actually deleted.
    ///
    /// Deleted policies are also unlinked from every OU.
    pub fn delete_items(&mut self, items: &[ItemId]) -> ConsoleResult<Vec<String>> {
        self.ensure_connected()?;
        let targets = self.unique_keys(items);
        let mut outcome = BatchOutcome::default();

        for (key, node_type) in targets {
            match self.directory.delete(&key) {
                Ok(()) => {
                    let unlinked = if node_type == NodeType::Policy {
                        self.remove_policy_links(&key)
                    } else {
                        Ok(())
                    };
                    self.remove_items_with_key(&key)?;
                    match unlinked {
                        Ok(()) => {
                            info!("event=delete module=controller status=ok dn={}", key);
                            outcome.succeeded.push(key);
                        }
                        Err(err) => {
                            warn!(
                                "event=delete module=controller status=error reason=unlink_failed dn={} error={}",
                                key, err
                            );
                            outcome
                                .failed
                                .push((key, format!("deleted, but unlinking failed: {err}")));
                        }
                    }
                }
                Err(DirectoryError::NotFound(_)) => {
                    debug!(
                        "event=delete module=controller status=skip reason=not_found dn={}",
                        key
                    );
                    self.remove_items_with_key(&key)?;
                }
                Err(err) => {
                    warn!(
                        "event=delete module=controller status=error dn={} error={}",
                        key, err
                    );
                    outcome.failed.push((key, err.to_string()));
                }
            }
        }
        outcome.finish()
    }

    /// Moves objects under `new_parent_key` and returns their new keys.
    pub fn move_items(
        &mut self,
        items: &[ItemId],
        new_parent_key: &str,
    ) -> ConsoleResult<Vec<String>> {
        self.ensure_connected()?;
        let targets = self.unique_keys(items);
        let mut outcome = BatchOutcome::default();

        for (key, _) in targets {
            match self.directory.move_object(&key, new_parent_key) {
                Ok(new_dn) => {
                    if !dn_equals(&key, &new_dn) {
                        self.reflect_move(&key, &new_dn, new_parent_key)?;
                    }
                    info!(
                        "event=move module=controller status=ok dn={} new_dn={}",
                        key, new_dn
                    );
                    outcome.succeeded.push(new_dn);
                }
                Err(err) => {
                    warn!(
                        "event=move module=controller status=error dn={} error={}",
                        key, err
                    );
                    outcome.failed.push((key, err.to_string()));
                }
            }
        }
        outcome.finish()
    }

    /// Renames the object behind `item` and returns its new key.
    pub fn rename_item(&mut self, item: ItemId, new_name: &str) -> ConsoleResult<String> {
        self.ensure_connected()?;
        let old_dn = self.require_key(item)?;
        if new_name.trim().is_empty() {
            return Err(ConsoleError::ValidationFailed("name must not be blank".to_string()));
        }

        let new_dn = self.directory.rename(&old_dn, new_name.trim())?;
        let entry = self.directory.get(&new_dn)?;
        let changed = self.apply_entry(&old_dn, &entry)?;
        if !dn_equals(&old_dn, &new_dn) {
            for item in changed {
                let Some(node) = item.as_node() else {
                    continue;
                };
                if self.store.fetch_state(node) == Some(FetchState::Fetched) {
                    self.store.refresh(node)?;
                }
            }
        }
        info!(
            "event=rename module=controller status=ok dn={} new_dn={}",
            old_dn, new_dn
        );
        Ok(new_dn)
    }

    /// Creates an object under the node's object and shows it where loaded.
    pub fn create_object(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NewObjectKind,
    ) -> ConsoleResult<String> {
        self.ensure_connected()?;
        let parent_key = self.require_key(parent.into())?;
        let dn = self.directory.create(name.trim(), &parent_key, kind)?;
        self.reflect_created(&dn)?;
        info!(
            "event=create module=controller status=ok kind={} dn={}",
            kind, dn
        );
        Ok(dn)
    }

    /// Creates a policy in the domain's policies container.
    pub fn create_policy(&mut self, name: &str) -> ConsoleResult<String> {
        self.ensure_connected()?;
        let container = policies_container_dn(&self.settings.domain_head);
        let dn = self
            .directory
            .create(name.trim(), &container, NewObjectKind::Policy)?;
        self.reflect_created(&dn)?;
        info!("event=create module=controller status=ok kind=policy dn={}", dn);
        Ok(dn)
    }

    /// Creates a policy and links it to the OU behind `ou_node`.
    pub fn create_and_link_policy(&mut self, ou_node: NodeId, name: &str) -> ConsoleResult<String> {
        let dn = self.create_policy(name)?;
        self.link_policies(ou_node, &[dn.clone()])?;
        Ok(dn)
    }

    /// Re-reads one object and refreshes every item showing it.
    pub fn update_item(&mut self, item: ItemId) -> ConsoleResult<()> {
        self.ensure_connected()?;
        let key = self.require_key(item)?;
        let entry = self.directory.get(&key)?;
        self.apply_entry(&key, &entry)?;
        Ok(())
    }

    /// Sets or clears the disabled bit of accounts; returns the changed keys.
    pub fn set_account_disabled(
        &mut self,
        items: &[ItemId],
        disabled: bool,
    ) -> ConsoleResult<Vec<String>> {
        self.ensure_connected()?;
        let mut outcome = BatchOutcome::default();
        for (key, _) in self.unique_keys(items) {
            match self.write_account_control(&key, disabled) {
                Ok(()) => outcome.succeeded.push(key),
                Err(err) => outcome.failed.push((key, err.to_string())),
            }
        }
        info!(
            "event=account_state module=controller status=ok disabled={} changed={} failed={}",
            disabled,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        outcome.finish()
    }

    /// Links policies to the OU behind `ou_node`; returns the newly linked ones.
    pub fn link_policies(
        &mut self,
        ou_node: NodeId,
        policy_dns: &[String],
    ) -> ConsoleResult<Vec<String>> {
        self.ensure_connected()?;
        let ou_dn = self.require_key(ou_node.into())?;
        let added = link_policies(&self.directory, &ou_dn, policy_dns)?;

        let mut planned = Vec::new();
        for dn in &added {
            match self.directory.get(dn) {
                Ok(entry) => planned.push(entry),
                Err(err) => warn!(
                    "event=link_policy module=controller status=skip policy={} error={}",
                    dn, err
                ),
            }
        }
        for item in self.store.find_by_key(&ou_dn, &[NodeType::PolicyOrgUnit]) {
            if let Some(node) = item.as_node() {
                self.insert_entries(node, planned.clone())?;
            }
        }
        let entry = self.directory.get(&ou_dn)?;
        self.apply_entry(&ou_dn, &entry)?;
        info!(
            "event=link_policy module=controller status=ok ou={} added={}",
            ou_dn,
            added.len()
        );
        Ok(added)
    }

    /// Writes the `gPOptions` inheritance flag of an OU.
    pub fn set_inheritance_blocked(&mut self, ou_node: NodeId, blocked: bool) -> ConsoleResult<()> {
        self.ensure_connected()?;
        let ou_dn = self.require_key(ou_node.into())?;
        let value = if blocked {
            GPOPTIONS_BLOCK_INHERITANCE
        } else {
            GPOPTIONS_INHERIT
        };
        self.directory
            .modify_attribute(&ou_dn, ATTRIBUTE_GPOPTIONS, &[value.to_string()])?;
        let entry = self.directory.get(&ou_dn)?;
        self.apply_entry(&ou_dn, &entry)?;
        Ok(())
    }

    /// Paged subtree search that stops between pages on [`Self::stop_search`].
    pub fn find_objects(&self, base: &str, filter: &str) -> ConsoleResult<Vec<Entry>> {
        self.ensure_connected()?;
        self.stop_search.store(false, Ordering::SeqCst);
        let request = SearchRequest::new(base, SearchScope::Subtree, filter);
        let results = search_all_pages(&self.directory, &request, &self.stop_search)?;
        Ok(results.into_values().collect())
    }

    /// Asks a running [`Self::find_objects`] to stop after the current page.
    pub fn stop_search(&self) {
        self.stop_search.store(true, Ordering::SeqCst);
    }

    /// Flag shared with threads that need to stop a search.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_search)
    }

    pub fn can_drop(&self, dragged: &[ItemId], target: ItemId) -> bool {
        self.coordinator
            .can_drop(&self.registry, &self.ctx(), dragged, target)
    }

    /// Runs one drop gesture and reports per-item outcomes.
    pub fn drop_items(&mut self, dragged: Vec<ItemId>, target: ItemId) -> ConsoleResult<DropReport> {
        self.ensure_connected()?;
        let report = self.coordinator.run(
            &self.registry,
            &self.directory,
            &self.settings,
            &mut self.store,
            dragged.clone(),
            target,
        )?;
        self.selection.retain(|item| self.store.contains(*item));
        self.events.push(ConsoleEvent::ItemsDropped {
            dragged,
            target,
            report: report.clone(),
        });
        Ok(report)
    }

    /// Drains store events into view updates.
    pub fn take_view_updates(&mut self) -> Vec<ViewUpdate> {
        let events = self.store.drain_events();
        self.views.apply(events)
    }

    pub fn views(&self) -> &ViewSync {
        &self.views
    }

    /// Dispatches one view input. Input on stale handles is ignored.
    pub fn handle_input(&mut self, input: UserInput) -> ConsoleResult<()> {
        let Some(command) = self.views.translate(input) else {
            return Ok(());
        };
        match command {
            ViewCommand::Activate(item) => self.activate(item).map(|_| ()),
            ViewCommand::SetSelection(items) => {
                self.set_selection(items);
                Ok(())
            }
            ViewCommand::Expand(node) => self.expand(node),
            ViewCommand::SelectScope(node) => self.select_scope(node),
            ViewCommand::Drop { dragged, target } => self.drop_items(dragged, target).map(|_| ()),
        }
    }

    pub fn drain_events(&mut self) -> Vec<ConsoleEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of rows listed for `node`.
    pub fn results_count(&self, node: NodeId) -> usize {
        self.store.rows_of(node).len()
    }

    pub fn register_results_view(
        &mut self,
        header_labels: Vec<String>,
        default_columns: Vec<usize>,
    ) -> ResultsViewId {
        self.views
            .register_results_view(header_labels, default_columns)
    }

    pub fn results_view_for(&self, node_type: NodeType) -> Option<&ResultsViewSpec> {
        self.views.results_view_for(node_type)
    }

    fn ctx(&self) -> BehaviorContext<'_> {
        BehaviorContext {
            directory: &self.directory,
            settings: &self.settings,
            store: &self.store,
        }
    }

    fn behavior(&self, node_type: NodeType) -> ConsoleResult<Arc<dyn NodeBehavior>> {
        Ok(self.registry.behavior_for(node_type)?)
    }

    fn ensure_connected(&self) -> ConsoleResult<()> {
        if self.directory.is_connected() {
            Ok(())
        } else {
            Err(ConsoleError::NotConnected)
        }
    }

    fn require_key(&self, item: ItemId) -> ConsoleResult<String> {
        if !self.store.contains(item) {
            return Err(ConsoleError::NotFound(item.to_string()));
        }
        self.store
            .source_key(item)
            .map(str::to_string)
            .ok_or_else(|| ConsoleError::ValidationFailed(format!("{item} has no directory object")))
    }

    /// Keys behind `items`, first occurrence wins.
    fn unique_keys(&self, items: &[ItemId]) -> Vec<(String, NodeType)> {
        let mut out: Vec<(String, NodeType)> = Vec::new();
        for item in items {
            let (Some(key), Some(node_type)) =
                (self.store.source_key(*item), self.store.node_type(*item))
            else {
                continue;
            };
            if !out.iter().any(|(existing, _)| dn_equals(existing, key)) {
                out.push((key.to_string(), node_type));
            }
        }
        out
    }

    /// Copies `entry` into every item keyed `key` and returns those items.
    fn apply_entry(&mut self, key: &str, entry: &Entry) -> ConsoleResult<Vec<ItemId>> {
        let items = self.store.find_by_key(key, &[]);
        let mut updates = Vec::with_capacity(items.len());
        {
            let ctx = self.ctx();
            for item in &items {
                if let Some(node_type) = self.store.node_type(*item) {
                    let data = self.behavior(node_type)?.item_data(&ctx, entry);
                    updates.push((*item, data));
                }
            }
        }

        let mut parents = BTreeSet::new();
        for (item, data) in updates {
            if !self.store.contains(item) {
                continue;
            }
            self.store.update(item, &data)?;
            if let Some(parent) = self.store.parent_of(item) {
                parents.insert(parent);
            }
        }
        for parent in parents {
            self.store.sort(parent)?;
        }
        Ok(items)
    }

    /// Plans `entries` with the behavior of `node` and inserts them if loaded.
    fn insert_entries(&mut self, node: NodeId, entries: Vec<Entry>) -> ConsoleResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let planned = {
            let Some(parent) = self.store.node(node) else {
                return Ok(());
            };
            self.behavior(parent.node_type)?
                .plan_children(&self.ctx(), parent, entries)
        };
        if !self.store.insert_planned(node, planned)?.is_empty() {
            self.store.sort(node)?;
        }
        Ok(())
    }

    /// Shows a new object under every loaded node of its parent, and new
    /// policies in every "All policies" folder.
    fn reflect_created(&mut self, dn: &str) -> ConsoleResult<()> {
        let entry = self.directory.get(dn)?;
        let mut targets: Vec<NodeId> = self
            .store
            .find_by_key(&parent_dn(dn), &[])
            .into_iter()
            .filter_map(ItemId::as_node)
            .collect();
        if entry.is_class(CLASS_GP_CONTAINER) {
            targets.extend(self.store.nodes_of_type(NodeType::SyntheticFolder));
        }
        for node in targets {
            self.insert_entries(node, vec![entry.clone()])?;
        }
        Ok(())
    }

    /// Inserts the moved object first, then removes the old items.
    fn reflect_move(&mut self, old_dn: &str, new_dn: &str, new_parent_key: &str) -> ConsoleResult<()> {
        match self.directory.get(new_dn) {
            Ok(entry) => {
                let destinations: Vec<NodeId> = self
                    .store
                    .find_by_key(new_parent_key, &[])
                    .into_iter()
                    .filter_map(ItemId::as_node)
                    .collect();
                for node in destinations {
                    self.insert_entries(node, vec![entry.clone()])?;
                }
            }
            Err(err) => warn!(
                "event=move module=controller status=skip reason=reread_failed dn={} error={}",
                new_dn, err
            ),
        }
        self.remove_items_with_key(old_dn)
    }

    fn remove_items_with_key(&mut self, key: &str) -> ConsoleResult<()> {
        let mut parents = BTreeSet::new();
        for item in self.store.find_by_key(key, &[]) {
            if !self.store.contains(item) {
                continue;
            }
            if let Some(parent) = self.store.parent_of(item) {
                parents.insert(parent);
            }
            self.store.delete_item(item)?;
        }
        self.selection.retain(|item| self.store.contains(*item));
        if self.current_scope.is_some_and(|node| !self.store.contains(node.into())) {
            self.current_scope = self.domain_root.filter(|root| self.store.contains((*root).into()));
        }
        for parent in parents {
            if self.store.contains(parent.into()) {
                self.store.sort(parent)?;
            }
        }
        Ok(())
    }

    /// Drops `policy_dn` from every `gPLink` in the domain.
    fn remove_policy_links(&mut self, policy_dn: &str) -> ConsoleResult<()> {
        let request = SearchRequest::new(
            self.settings.domain_head.trim(),
            SearchScope::Subtree,
            filter_contains(ATTRIBUTE_GPLINK, policy_dn),
        )
        .with_attributes([ATTRIBUTE_GPLINK]);
        let linked = self.directory.search(&request)?;

        for (ou_dn, ou) in linked {
            let mut gplink = Gplink::parse(ou.get_string(ATTRIBUTE_GPLINK).unwrap_or_default());
            if !gplink.remove(policy_dn) {
                continue;
            }
            let values = if gplink.is_empty() {
                Vec::new()
            } else {
                vec![gplink.to_string()]
            };
            self.directory
                .modify_attribute(&ou_dn, ATTRIBUTE_GPLINK, &values)?;
            let entry = self.directory.get(&ou_dn)?;
            self.apply_entry(&ou_dn, &entry)?;
            info!(
                "event=unlink_policy module=controller status=ok ou={} policy={}",
                ou_dn, policy_dn
            );
        }
        Ok(())
    }

    fn write_account_control(&mut self, dn: &str, disabled: bool) -> ConsoleResult<()> {
        let entry = self.directory.get(dn)?;
        let current = entry
            .get_int(ATTRIBUTE_USER_ACCOUNT_CONTROL)
            .unwrap_or(UAC_NORMAL_ACCOUNT);
        let updated = if disabled {
            current | UAC_ACCOUNT_DISABLE
        } else {
            current & !UAC_ACCOUNT_DISABLE
        };
        self.directory
            .modify_attribute(dn, ATTRIBUTE_USER_ACCOUNT_CONTROL, &[updated.to_string()])?;
        let entry = self.directory.get(dn)?;
        self.apply_entry(dn, &entry)?;
        Ok(())
    }
}
