//! # JSON File Snapshot Store
//!
//! The whole queue as one JSON array in one file.
//!
//! ## Atomic Replace
//! ```text
//! save(items)
//!   │
//!   ├── write  queue.json.tmp
//!   ├── fsync  queue.json.tmp
//!   └── rename queue.json.tmp → queue.json   (atomic on the same filesystem)
//! ```
//!
//! A crash at any step leaves either the previous `queue.json` or the new
//! one. A stale `.tmp` is simply overwritten by the next save.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::SnapshotStore;
use crate::error::DbResult;
use tally_core::QueuedTransaction;

/// Snapshot store writing a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileSnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "queue.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn save(&self, items: &[QueuedTransaction]) -> DbResult<()> {
        let bytes = serde_json::to_vec_pretty(items)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::OpenOptions::new()
            .write(true)
            .open(&tmp)
            .await?
            .sync_all()
            .await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), count = items.len(), "Queue snapshot written");
        Ok(())
    }

    async fn load(&self) -> Vec<QueuedTransaction> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot unreadable, starting empty");
                return Vec::new();
            }
        };

        let elements = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(serde_json::Value::Array(elements)) => elements,
            Ok(_) => {
                warn!(path = %self.path.display(), "Snapshot is not a JSON array, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot is not valid JSON, starting empty");
                return Vec::new();
            }
        };

        let total = elements.len();
        let items: Vec<QueuedTransaction> = elements
            .into_iter()
            .enumerate()
            .filter_map(|(index, element)| {
                match serde_json::from_value::<QueuedTransaction>(element) {
                    Ok(item) if !item.id.is_empty() => Some(item),
                    Ok(_) => {
                        warn!(index, "Skipping snapshot record with empty id");
                        None
                    }
                    Err(e) => {
                        warn!(index, error = %e, "Skipping malformed snapshot record");
                        None
                    }
                }
            })
            .collect();

        debug!(path = %self.path.display(), loaded = items.len(), stored = total, "Queue snapshot read");
        items
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn store_in(dir: &tempfile::TempDir) -> JsonFileSnapshotStore {
        JsonFileSnapshotStore::new(dir.path().join("state").join("queue.json"))
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut failed = QueuedTransaction::new("bill", json!({"lines": [{"sku": "X"}]}), Utc::now());
        failed.begin_sync().unwrap();
        failed.mark_failed("connection reset").unwrap();
        let pending = QueuedTransaction::new("product_update", json!({"stock": 3}), Utc::now());

        store.save(&[failed.clone(), pending.clone()]).await.unwrap();
        assert_eq!(store.load().await, vec![failed, pending]);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_malformed_elements_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let good = QueuedTransaction::new("bill", json!({}), Utc::now());
        store.save(&[good.clone()]).await.unwrap();

        let mut raw: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        raw.push(json!({"id": "broken"}));
        raw.push(json!(42));
        raw.push(json!({
            "id": "bad-status", "kind": "bill", "payload": {},
            "created_at": "2026-01-01T00:00:00Z", "status": "lost",
            "attempt_count": 0, "last_error": null
        }));
        std::fs::write(store.path(), serde_json::to_vec(&raw).unwrap()).unwrap();

        assert_eq!(store.load().await, vec![good]);
    }

    #[tokio::test]
    async fn test_garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        std::fs::write(store.path(), b"{\"not\": \"an array\"}").unwrap();
        assert!(store.load().await.is_empty());

        std::fs::write(store.path(), b"\x00\x01 truncated [").unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_location_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = JsonFileSnapshotStore::new(blocker.join("queue.json"));

        assert!(store.save(&[]).await.is_err());
    }
}
