use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-developer mutual exclusion for billing transitions.
///
/// Only the entry for one developer is locked; the map's shard lock is never
/// held across an `.await`. Entries are dropped once nobody references them.
#[derive(Clone, Default)]
pub struct DeveloperLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Held for the duration of a read-evaluate-charge-update sequence.
pub struct DeveloperGuard {
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl DeveloperLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: Uuid) -> DeveloperGuard {
        let lock = self.locks.entry(id).or_default().clone();
        let guard = lock.lock_owned().await;
        DeveloperGuard {
            id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of developers with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for DeveloperGuard {
    fn drop(&mut self) {
        // Release the mutex first so the strong count below reflects waiters only.
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
