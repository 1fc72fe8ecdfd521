//! Per-source run locks
//!
//! Runs against the same backing store rewrite the same snapshot tables, so
//! they must not overlap. Runs against different stores never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of async mutexes keyed by data source identity
#[derive(Debug, Clone, Default)]
pub struct SourceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, identity: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive use of a source; released when the guard drops
    pub async fn lock(&self, identity: &str) -> OwnedMutexGuard<()> {
        debug!(source = identity, "Waiting for source lock");
        self.entry(identity).lock_owned().await
    }

    /// Take the lock only if nobody holds it
    pub fn try_lock(&self, identity: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(identity).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_identity_is_exclusive() {
        let locks = SourceLocks::new();
        let guard = locks.lock("duckdb:a").await;
        assert!(locks.try_lock("duckdb:a").is_none());
        assert!(locks.try_lock("duckdb:b").is_some());
        drop(guard);
        assert!(locks.clone().try_lock("duckdb:a").is_some());
    }
}
