//! Per-folder mutual exclusion shared by every synchronization trigger.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Identifies one folder of one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderKey {
    pub account: String,
    pub folder_id: String,
}

impl FolderKey {
    pub fn new(account: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            folder_id: folder_id.into(),
        }
    }
}

/// Set of folders currently being synchronized.
///
/// Clones share the same set. Any number of folders may be active at once,
/// but never the same folder twice.
#[derive(Debug, Clone, Default)]
pub struct FolderGate {
    active: Arc<Mutex<HashSet<FolderKey>>>,
}

impl FolderGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<FolderKey>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims the folder, or returns `None` if it is already active.
    pub fn try_acquire(&self, key: FolderKey) -> Option<FolderLease> {
        if self.lock().insert(key.clone()) {
            Some(FolderLease {
                gate: self.clone(),
                key,
            })
        } else {
            None
        }
    }

    /// Claims the folder, polling for at most `wait` while it is busy.
    pub async fn acquire(
        &self,
        key: FolderKey,
        wait: Duration,
        poll_interval: Duration,
    ) -> Option<FolderLease> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(lease) = self.try_acquire(key.clone()) {
                return Some(lease);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    pub fn is_active(&self, key: &FolderKey) -> bool {
        self.lock().contains(key)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}

/// Releases the folder when dropped.
#[derive(Debug)]
pub struct FolderLease {
    gate: FolderGate,
    key: FolderKey,
}

impl FolderLease {
    pub fn key(&self) -> &FolderKey {
        &self.key
    }
}

impl Drop for FolderLease {
    fn drop(&mut self) {
        self.gate.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_folder_is_exclusive() {
        let gate = FolderGate::new();
        let key = FolderKey::new("acct", "inbox");

        let lease = gate.try_acquire(key.clone()).unwrap();
        assert!(gate.try_acquire(key.clone()).is_none());
        assert!(gate.is_active(&key));

        drop(lease);
        assert!(!gate.is_active(&key));
        assert!(gate.try_acquire(key).is_some());
    }

    #[test]
    fn test_different_folders_run_concurrently() {
        let gate = FolderGate::new();
        let _a = gate.try_acquire(FolderKey::new("acct", "inbox")).unwrap();
        let _b = gate.try_acquire(FolderKey::new("acct", "drafts")).unwrap();
        let _c = gate.try_acquire(FolderKey::new("other", "inbox")).unwrap();
        assert_eq!(gate.active_count(), 3);
    }

    #[tokio::test]
    async fn test_acquire_gives_up_after_wait() {
        let gate = FolderGate::new();
        let key = FolderKey::new("acct", "inbox");
        let _held = gate.try_acquire(key.clone()).unwrap();

        let result = gate
            .acquire(key, Duration::from_millis(30), Duration::from_millis(5))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_acquire_succeeds_once_released() {
        let gate = FolderGate::new();
        let key = FolderKey::new("acct", "inbox");
        let held = gate.try_acquire(key.clone()).unwrap();

        let waiter = {
            let gate = gate.clone();
            let key = key.clone();
            tokio::spawn(async move {
                gate.acquire(key, Duration::from_secs(2), Duration::from_millis(5))
                    .await
                    .is_some()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }
}
