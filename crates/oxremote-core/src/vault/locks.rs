//! Per-directory locks serializing first resolution of a directory id.
//!
//! Two tasks that both find a directory marker missing would otherwise mint
//! two ids for the same directory. The resolver takes the lock for the
//! cleartext path, then re-checks its cache and the backend before creating.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock manager keyed by cleartext directory path.
#[derive(Debug, Default)]
pub struct DirectoryLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop lock entries nobody holds.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
