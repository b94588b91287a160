//! Per-subscription serialization of sync and lifecycle operations.

use std::collections::HashMap;
use std::sync::Arc;

use bb_core::SubscriptionId;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<SubscriptionId, Arc<AsyncMutex<()>>>;

/// Hands out one async lock per subscription id.
///
/// Holding the guard across the diff download keeps a second sync of the same
/// subscription waiting until the first one has committed. A lock is dropped
/// from the map when its last holder or waiter lets go.
#[derive(Debug, Default)]
pub struct SyncScheduler {
    locks: Mutex<LockMap>,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &SubscriptionId) -> ScheduledGuard<'_> {
        let lock = self.locks.lock().entry(id.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        ScheduledGuard {
            locks: &self.locks,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    /// Whether an operation on `id` currently holds its lock.
    pub fn is_busy(&self, id: &SubscriptionId) -> bool {
        self.locks
            .lock()
            .get(id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of subscriptions with a lock held or awaited.
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Exclusive access to one subscription until dropped.
#[derive(Debug)]
pub struct ScheduledGuard<'a> {
    locks: &'a Mutex<LockMap>,
    id: SubscriptionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScheduledGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        // Waiters clone the Arc under the map lock, so a count of one means
        // only the map still refers to it.
        if locks.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.id);
        }
    }
}
