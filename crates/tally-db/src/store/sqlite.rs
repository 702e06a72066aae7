//! SQLite-backed snapshot store.

use async_trait::async_trait;
use tracing::warn;

use super::SnapshotStore;
use crate::error::DbResult;
use crate::pool::{Database, DbConfig};
use tally_core::QueuedTransaction;

/// Snapshot store over the `transaction_queue` table.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    db: Database,
    location: String,
}

impl SqliteSnapshotStore {
    /// Connects (creating the file and schema if needed).
    pub async fn open(config: DbConfig) -> DbResult<Self> {
        let location = config.location();
        let db = Database::new(config).await?;
        Ok(SqliteSnapshotStore { db, location })
    }

    /// Wraps an already-open database.
    pub fn from_database(db: Database) -> Self {
        SqliteSnapshotStore {
            db,
            location: "sqlite".to_string(),
        }
    }

    /// Returns the underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, items: &[QueuedTransaction]) -> DbResult<()> {
        self.db.queue_snapshot().replace_all(items).await
    }

    async fn load(&self) -> Vec<QueuedTransaction> {
        match self.db.queue_snapshot().load_all().await {
            Ok(items) => items,
            Err(e) => {
                warn!(location = %self.location, error = %e, "Snapshot unreadable, starting empty");
                Vec::new()
            }
        }
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let a = QueuedTransaction::new("bill", json!({"n": 1}), Utc::now());
        let b = QueuedTransaction::new("bill", json!({"n": 2}), Utc::now());

        {
            let store = SqliteSnapshotStore::open(DbConfig::new(&path)).await.unwrap();
            store.save(&[a.clone(), b.clone()]).await.unwrap();
            store.database().close().await;
        }

        let store = SqliteSnapshotStore::open(DbConfig::new(&path)).await.unwrap();
        assert_eq!(store.load().await, vec![a, b]);
        assert!(store.describe().ends_with("queue.db"));
    }

    #[tokio::test]
    async fn test_load_after_close_is_empty() {
        let store = SqliteSnapshotStore::open(DbConfig::in_memory()).await.unwrap();
        let a = QueuedTransaction::new("bill", json!({}), Utc::now());
        store.save(&[a]).await.unwrap();

        store.database().close().await;
        assert!(store.load().await.is_empty());
        assert!(store.save(&[]).await.is_err());
    }
}
