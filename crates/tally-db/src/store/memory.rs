//! In-process snapshot store.
//!
//! Survives "restarts" that share the same `Arc<MemorySnapshotStore>`,
//! which is what the engine tests use to simulate a process restart.
//! Writes can be made to fail on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::SnapshotStore;
use crate::error::{DbError, DbResult};
use tally_core::QueuedTransaction;

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Vec<QueuedTransaction>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with an existing snapshot.
    pub fn with_items(items: Vec<QueuedTransaction>) -> Self {
        MemorySnapshotStore {
            snapshot: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Makes every following `save` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Copy of the stored snapshot.
    pub fn snapshot(&self) -> Vec<QueuedTransaction> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueuedTransaction>> {
        self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, items: &[QueuedTransaction]) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Io("simulated write failure".to_string()));
        }
        *self.lock() = items.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Vec<QueuedTransaction> {
        self.snapshot()
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_failed_write_keeps_previous_snapshot() {
        let store = MemorySnapshotStore::new();
        let a = QueuedTransaction::new("bill", json!({}), Utc::now());
        store.save(&[a.clone()]).await.unwrap();

        store.set_fail_writes(true);
        assert!(store.save(&[]).await.is_err());
        assert_eq!(store.load().await, vec![a]);
        assert_eq!(store.save_count(), 1);

        store.set_fail_writes(false);
        store.save(&[]).await.unwrap();
        assert!(store.load().await.is_empty());
    }
}
