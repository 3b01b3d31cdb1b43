//! Per-host mutual exclusion for concurrent probes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Process-wide map from canonical host to its probe lock.
///
/// A lock is created on first request per host and reused afterwards; locks
/// are never removed, and the host set is bounded by the target set.
#[derive(Default)]
pub struct HostLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl HostLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `host`, waiting until it is free.
    ///
    /// Held until the returned guard is dropped.
    pub async fn acquire(&self, host: String) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(host)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
