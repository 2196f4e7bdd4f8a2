//! Per-family exclusive sections
//!
//! Every synchronization entry point reads rows, decides, then writes. Two
//! edits on the same family must not interleave, so each entry point holds the
//! mutex keyed by the family's conceptual root id for its whole duration.
//! Internal calls made under the lock never re-acquire it.

use dashmap::DashMap;
use std::sync::Arc;
use strata_storage::ModelId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct FamilyLocks {
    locks: DashMap<ModelId, Arc<Mutex<()>>>,
}

impl FamilyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the family rooted at `root_id`
    pub async fn acquire(&self, root_id: ModelId) -> OwnedMutexGuard<()> {
        // Clone the Arc out before awaiting so no DashMap shard guard is held
        // across the suspension point.
        let lock = self
            .locks
            .entry(root_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Number of families that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
