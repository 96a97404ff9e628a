//! Drag-and-drop gesture lifecycle.
//!
//! # Responsibility
//! - Validate a gesture against the target's behavior.
//! - Run the behavior's drop and apply the returned store patches in order.
//!
//! # Invariants
//! - A single-item gesture that fails validation changes neither the
//!   directory nor the store.
//! - Multi-item gestures are accepted optimistically; each item gets its own
//!   outcome and failures are never rolled back.
//! - Phases only advance `Proposed -> Validated -> Executing -> Applied`, with
//!   `Rejected` reachable from `Proposed` and `Executing`.

use crate::behavior::{
    BehaviorContext, BehaviorRegistry, DropExecution, DropItemResult, DropOutcome, DropRequest,
    NodeBehavior, StorePatch,
};
use crate::config::BrowserSettings;
use crate::directory::DirectoryService;
use crate::model::node::{ItemId, NodeId, NodeType};
use crate::store::{ItemStore, StoreError, StoreResult};
use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Lifecycle phase of one gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPhase {
    Proposed,
    Validated,
    Executing,
    Applied,
    Rejected,
}

impl DropPhase {
    fn can_advance_to(self, next: DropPhase) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Validated)
                | (Self::Proposed, Self::Rejected)
                | (Self::Validated, Self::Executing)
                | (Self::Executing, Self::Applied)
                | (Self::Executing, Self::Rejected)
        )
    }
}

impl Display for DropPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Proposed => "proposed",
            Self::Validated => "validated",
            Self::Executing => "executing",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        };
        f.write_str(value)
    }
}

/// One drag of `dragged` items onto `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropGesture {
    pub dragged: Vec<ItemId>,
    pub target: ItemId,
    phase: DropPhase,
}

impl DropGesture {
    pub fn new(dragged: Vec<ItemId>, target: ItemId) -> Self {
        Self {
            dragged,
            target,
            phase: DropPhase::Proposed,
        }
    }

    pub fn phase(&self) -> DropPhase {
        self.phase
    }

    fn advance(&mut self, next: DropPhase) -> StoreResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(StoreError::InvariantViolated(format!(
                "drop phase cannot go from {} to {}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }
}

/// Final result of one gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropReport {
    pub phase: DropPhase,
    pub results: Vec<DropItemResult>,
    /// Why the whole gesture was rejected, if it was.
    pub reason: Option<String>,
}

impl DropReport {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            phase: DropPhase::Rejected,
            results: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.results.iter().filter(|result| result.applied()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|result| matches!(result.outcome, DropOutcome::Failed(_)))
            .count()
    }

    /// Some items applied and some did not.
    pub fn is_partial(&self) -> bool {
        let applied = self.applied_count();
        applied > 0 && applied < self.results.len()
    }
}

/// Runs gestures through their phases.
#[derive(Debug, Default)]
pub struct DropCoordinator;

impl DropCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Returns whether a gesture would pass validation.
    pub fn can_drop(
        &self,
        registry: &BehaviorRegistry,
        ctx: &BehaviorContext<'_>,
        dragged: &[ItemId],
        target: ItemId,
    ) -> bool {
        self.check(registry, ctx, dragged, target).is_ok()
    }

    /// Validates, executes and applies one gesture.
    ///
    /// Store errors are reported only for broken invariants; every directory
    /// failure ends up as a per-item outcome.
    pub fn run(
        &self,
        registry: &BehaviorRegistry,
        directory: &dyn DirectoryService,
        settings: &BrowserSettings,
        store: &mut ItemStore,
        dragged: Vec<ItemId>,
        target: ItemId,
    ) -> StoreResult<DropReport> {
        let mut gesture = DropGesture::new(dragged, target);

        let execution = {
            let ctx = BehaviorContext {
                directory,
                settings,
                store: &*store,
            };
            if let Err(reason) = self.check(registry, &ctx, &gesture.dragged, target) {
                gesture.advance(DropPhase::Rejected)?;
                info!(
                    "event=drop module=drop status=rejected target={} dragged={} reason={}",
                    target,
                    gesture.dragged.len(),
                    reason
                );
                return Ok(DropReport::rejected(reason));
            }
            gesture.advance(DropPhase::Validated)?;
            gesture.advance(DropPhase::Executing)?;

            let (behavior, request_types, target_type) =
                match resolve(registry, &ctx, &gesture.dragged, target) {
                    Ok(resolved) => resolved,
                    Err(reason) => {
                        gesture.advance(DropPhase::Rejected)?;
                        return Ok(DropReport::rejected(reason));
                    }
                };
            let request = DropRequest {
                dragged: &gesture.dragged,
                dragged_types: &request_types,
                target,
                target_type,
            };
            behavior.execute_drop(&ctx, &request)
        };

        let touched = apply_patches(store, &execution)?;
        for node in touched {
            if store.contains(node.into()) {
                store.sort(node)?;
            }
        }

        let any_applied = execution.results.iter().any(DropItemResult::applied);
        gesture.advance(if any_applied {
            DropPhase::Applied
        } else {
            DropPhase::Rejected
        })?;

        for result in &execution.results {
            match &result.outcome {
                DropOutcome::Applied => info!(
                    "event=drop_item module=drop status=ok item={} action={:?}",
                    result.item, result.action
                ),
                DropOutcome::Rejected(reason) => info!(
                    "event=drop_item module=drop status=skip item={} reason={}",
                    result.item, reason
                ),
                DropOutcome::Failed(message) => warn!(
                    "event=drop_item module=drop status=error item={} action={:?} error={}",
                    result.item, result.action, message
                ),
            }
        }
        info!(
            "event=drop module=drop status={} target={} dragged={} applied={}",
            gesture.phase(),
            target,
            gesture.dragged.len(),
            execution.results.iter().filter(|result| result.applied()).count()
        );

        Ok(DropReport {
            phase: gesture.phase(),
            results: execution.results,
            reason: None,
        })
    }

    /// Single-item gestures fail fast; multi-item ones only need the target
    /// to accept the dragged types. A target that is also dragged is skipped
    /// per item at execution.
    fn check(
        &self,
        registry: &BehaviorRegistry,
        ctx: &BehaviorContext<'_>,
        dragged: &[ItemId],
        target: ItemId,
    ) -> Result<(), String> {
        if dragged.is_empty() {
            return Err("nothing dragged".to_string());
        }
        if dragged == [target] {
            return Err("an item cannot be dropped onto itself".to_string());
        }
        let (behavior, dragged_types, target_type) = resolve(registry, ctx, dragged, target)?;
        let request = DropRequest {
            dragged,
            dragged_types: &dragged_types,
            target,
            target_type,
        };
        if behavior.can_drop(ctx, &request) {
            Ok(())
        } else {
            Err(format!("{target_type} does not accept this drop"))
        }
    }
}

type Resolved = (Arc<dyn NodeBehavior>, BTreeSet<NodeType>, NodeType);

fn resolve(
    registry: &BehaviorRegistry,
    ctx: &BehaviorContext<'_>,
    dragged: &[ItemId],
    target: ItemId,
) -> Result<Resolved, String> {
    let target_type = ctx
        .store
        .node_type(target)
        .ok_or_else(|| format!("drop target {target} no longer exists"))?;
    let mut dragged_types = BTreeSet::new();
    for item in dragged {
        let node_type = ctx
            .store
            .node_type(*item)
            .ok_or_else(|| format!("dragged item {item} no longer exists"))?;
        dragged_types.insert(node_type);
    }
    let behavior = registry
        .behavior_for(target_type)
        .map_err(|err| err.to_string())?;
    Ok((behavior, dragged_types, target_type))
}

/// Applies patches in order and returns the nodes whose children changed.
///
/// Items already gone are skipped; patches from one gesture can overlap.
pub(crate) fn apply_patches(
    store: &mut ItemStore,
    execution: &DropExecution,
) -> StoreResult<Vec<NodeId>> {
    let mut touched = Vec::new();
    for patch in &execution.patches {
        match patch {
            StorePatch::Insert { parent, items } => {
                if !store.contains((*parent).into()) {
                    continue;
                }
                if !store.insert_planned(*parent, items.clone())?.is_empty() {
                    touched.push(*parent);
                }
            }
            StorePatch::Remove(item) => {
                if !store.contains(*item) {
                    continue;
                }
                if let Some(parent) = store.parent_of(*item) {
                    touched.push(parent);
                }
                store.delete_item(*item)?;
            }
            StorePatch::Update { item, data } => {
                if !store.contains(*item) {
                    continue;
                }
                store.update(*item, data)?;
                if let Some(parent) = store.parent_of(*item) {
                    touched.push(parent);
                }
            }
            StorePatch::Refresh(node) => {
                if store.contains((*node).into()) {
                    store.refresh(*node)?;
                }
            }
        }
    }
    touched.sort();
    touched.dedup();
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::DropPhase;

    #[test]
    fn phases_only_move_forward() {
        assert!(DropPhase::Proposed.can_advance_to(DropPhase::Validated));
        assert!(DropPhase::Proposed.can_advance_to(DropPhase::Rejected));
        assert!(DropPhase::Executing.can_advance_to(DropPhase::Applied));
        assert!(!DropPhase::Validated.can_advance_to(DropPhase::Applied));
        assert!(!DropPhase::Applied.can_advance_to(DropPhase::Executing));
        assert!(!DropPhase::Rejected.can_advance_to(DropPhase::Validated));
    }
}
