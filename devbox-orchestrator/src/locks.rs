//! Per-workspace serialization of state-changing operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed async mutex. Entries are dropped once nobody holds or waits on them.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLocks {
    locks: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `workspace_id`.
    pub async fn acquire(&self, workspace_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(workspace_id);
        lock.lock_owned().await
    }

    fn lock_for(&self, workspace_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = map.get(workspace_id).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        map.insert(workspace_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Number of workspaces with a live lock entry.
    pub fn active(&self) -> usize {
        let map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        map.values().filter(|weak| weak.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = WorkspaceLocks::new();
        let guard = locks.acquire("ws-1").await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.acquire("ws-1").await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = WorkspaceLocks::new();
        let _a = locks.acquire("ws-1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("ws-2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_are_released() {
        let locks = WorkspaceLocks::new();
        {
            let _guard = locks.acquire("ws-1").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }
}
