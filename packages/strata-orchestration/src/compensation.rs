//! Compensating actions for multi-step writes
//!
//! A cascade touches several tables across several layers and the storage
//! port offers no transaction spanning them. Each insert is recorded here as
//! the delete that undoes it; on failure the log is replayed newest first.
//! Updates and deletes are not compensated.

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_storage::{
    AttributeId, CanonicalId, ModelId, ModelObjectId, ModelStore, ObjectId, RelationshipId,
};
use tracing::{info, warn};

use crate::error::{Result, SyncError};

/// Undo action for one insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "id", rename_all = "snake_case")]
pub enum CompensatingAction {
    DeleteModel(ModelId),
    DeleteObject(ObjectId),
    DeleteAttribute(AttributeId),
    DeleteModelObject(ModelObjectId),
    DeleteRelationship(RelationshipId),
    DeleteCanonical(CanonicalId),
}

impl CompensatingAction {
    async fn execute(&self, store: &dyn ModelStore) -> Result<()> {
        match *self {
            // Models have no delete in the port; an orphaned empty model is harmless
            CompensatingAction::DeleteModel(_) => Ok(()),
            CompensatingAction::DeleteObject(id) => Ok(store.delete_data_object(id).await?),
            CompensatingAction::DeleteAttribute(id) => Ok(store.delete_attribute(id).await?),
            CompensatingAction::DeleteModelObject(id) => {
                Ok(store.delete_data_model_object(id).await?)
            }
            CompensatingAction::DeleteRelationship(id) => {
                Ok(store.delete_relationship(id).await?)
            }
            CompensatingAction::DeleteCanonical(id) => {
                Ok(store.delete_canonical_relationship(id).await?)
            }
        }
    }
}

impl fmt::Display for CompensatingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompensatingAction::DeleteModel(id) => write!(f, "delete model {}", id),
            CompensatingAction::DeleteObject(id) => write!(f, "delete object {}", id),
            CompensatingAction::DeleteAttribute(id) => write!(f, "delete attribute {}", id),
            CompensatingAction::DeleteModelObject(id) => write!(f, "delete model object {}", id),
            CompensatingAction::DeleteRelationship(id) => write!(f, "delete relationship {}", id),
            CompensatingAction::DeleteCanonical(id) => {
                write!(f, "delete canonical relationship {}", id)
            }
        }
    }
}

/// Structured state left behind by a failed multi-step call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialFailureReport {
    /// Undo actions for every write that succeeded before the failure
    pub completed: Vec<CompensatingAction>,
    pub rollback_attempted: bool,
    pub rolled_back: Vec<CompensatingAction>,
    /// Undo actions that failed, with the error text
    pub rollback_failures: Vec<(CompensatingAction, String)>,
}

impl PartialFailureReport {
    /// True when storage is back to its state before the call
    pub fn is_clean(&self) -> bool {
        self.rollback_attempted
            && self.rollback_failures.is_empty()
            && self.rolled_back.len() == self.completed.len()
    }

    /// Writes still present in storage
    pub fn residual(&self) -> Vec<CompensatingAction> {
        self.completed
            .iter()
            .filter(|a| !self.rolled_back.contains(a))
            .copied()
            .collect()
    }
}

impl fmt::Display for PartialFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rollback_attempted {
            write!(
                f,
                "{} writes, {} rolled back, {} rollback failures",
                self.completed.len(),
                self.rolled_back.len(),
                self.rollback_failures.len()
            )
        } else {
            write!(f, "{} writes left in place", self.completed.len())
        }
    }
}

/// Ordered undo log of one top-level call
#[derive(Debug, Default)]
pub struct CompensationLog {
    actions: Vec<CompensatingAction>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: CompensatingAction) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[CompensatingAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Forget a recorded write (the row was deleted on purpose)
    pub fn forget(&mut self, action: CompensatingAction) {
        self.actions.retain(|a| *a != action);
    }

    /// Turn the log into a report, replaying it newest first when `rollback`
    pub async fn settle(&mut self, store: &dyn ModelStore, rollback: bool) -> PartialFailureReport {
        let completed = std::mem::take(&mut self.actions);
        let mut report = PartialFailureReport {
            completed: completed.clone(),
            rollback_attempted: rollback,
            ..Default::default()
        };

        if !rollback {
            warn!(
                "Leaving {} writes in place after failure (rollback disabled)",
                completed.len()
            );
            return report;
        }

        for action in completed.iter().rev() {
            match action.execute(store).await {
                Ok(()) => report.rolled_back.push(*action),
                Err(e) => {
                    warn!("Rollback step '{}' failed: {}", action, e);
                    report.rollback_failures.push((*action, e.to_string()));
                }
            }
        }

        info!("Rollback finished: {}", report);
        report
    }
}

/// Pass `result` through, converting a failure after writes into `PartialCascade`
///
/// A failure before any write returns the original error unchanged.
pub(crate) async fn settle_result<T>(
    log: &mut CompensationLog,
    store: &dyn ModelStore,
    rollback: bool,
    step: &str,
    result: Result<T>,
) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if log.is_empty() => Err(e),
        Err(e) => {
            let report = log.settle(store, rollback).await;
            Err(SyncError::PartialCascade {
                step: step.to_string(),
                source: Box::new(e),
                report,
            })
        }
    }
}
