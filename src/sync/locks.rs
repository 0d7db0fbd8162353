//! Per-user serialization of sync pushes.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::models::Identity;

/// Hands out one async mutex per user so that a user's read-merge-write
/// sequences never interleave. Different users proceed in parallel.
pub struct UserLocks {
    locks: RwLock<HashMap<Identity, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Waits for and takes the lock of `owner`.
    pub async fn lock(&self, owner: Identity) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(&owner).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut locks = self.locks.write().await;
                locks
                    .entry(owner)
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            }
        };
        lock.lock_owned().await
    }

    /// Drops entries nobody holds or waits on. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let mut locks = self.locks.write().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new()
    }
}
