//! # Queue Snapshot Repository
//!
//! Whole-snapshot reads and writes of the `transaction_queue` table.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  1. DELETE FROM transaction_queue                                      │
//! │  2. INSERT one row per item, position = index in the in-memory queue   │
//! │                                                                         │
//! │  COMMIT ← the old snapshot or the new one, never a mix                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use tally_core::{QueuedTransaction, TransactionStatus};

/// Repository for the queue snapshot table.
#[derive(Debug, Clone)]
pub struct QueueSnapshotRepository {
    pool: SqlitePool,
}

impl QueueSnapshotRepository {
    /// Creates a new QueueSnapshotRepository.
    pub fn new(pool: SqlitePool) -> Self {
        QueueSnapshotRepository { pool }
    }

    /// Replaces the stored snapshot with `items`, in order.
    pub async fn replace_all(&self, items: &[QueuedTransaction]) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM transaction_queue")
            .execute(&mut *tx)
            .await?;

        for (position, item) in items.iter().enumerate() {
            let payload = serde_json::to_string(&item.payload)?;

            sqlx::query(
                r#"
                INSERT INTO transaction_queue (
                    position, id, kind, payload,
                    created_at, status, attempt_count, last_error
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(position as i64)
            .bind(&item.id)
            .bind(&item.kind)
            .bind(payload)
            .bind(encode_timestamp(&item.created_at))
            .bind(item.status.as_str())
            .bind(i64::from(item.attempt_count))
            .bind(item.last_error.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(count = items.len(), "Queue snapshot written");
        Ok(())
    }

    /// Reads the stored snapshot in queue order.
    ///
    /// Rows that fail to decode are logged and skipped; the rest load.
    pub async fn load_all(&self) -> DbResult<Vec<QueuedTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT
                position, id, kind, payload,
                created_at, status, attempt_count, last_error
            FROM transaction_queue
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_row(row) {
                Ok(item) => items.push(item),
                Err(reason) => {
                    let id: Option<String> = row.try_get("id").ok();
                    warn!(?id, %reason, "Skipping malformed queue row");
                }
            }
        }

        debug!(loaded = items.len(), stored = rows.len(), "Queue snapshot read");
        Ok(items)
    }

    /// Counts stored rows.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transaction_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// RFC 3339 with nanoseconds, so a reload reproduces `created_at` exactly.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_row(row: &SqliteRow) -> Result<QueuedTransaction, String> {
    let id: String = row.try_get("id").map_err(|e| e.to_string())?;
    if id.is_empty() {
        return Err("empty id".to_string());
    }

    let kind: String = row.try_get("kind").map_err(|e| e.to_string())?;

    let payload: String = row.try_get("payload").map_err(|e| e.to_string())?;
    let payload = serde_json::from_str(&payload).map_err(|e| format!("payload: {}", e))?;

    let created_at: String = row.try_get("created_at").map_err(|e| e.to_string())?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| format!("created_at: {}", e))?
        .with_timezone(&Utc);

    let status: String = row.try_get("status").map_err(|e| e.to_string())?;
    let status: TransactionStatus = status.parse()?;

    let attempt_count: i64 = row.try_get("attempt_count").map_err(|e| e.to_string())?;
    let attempt_count =
        u32::try_from(attempt_count).map_err(|_| format!("attempt_count: {}", attempt_count))?;

    let last_error: Option<String> = row.try_get("last_error").map_err(|e| e.to_string())?;

    Ok(QueuedTransaction {
        id,
        kind,
        payload,
        created_at,
        status,
        attempt_count,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn repo() -> (Database, QueueSnapshotRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.queue_snapshot();
        (db, repo)
    }

    #[tokio::test]
    async fn test_replace_all_preserves_order_and_fields() {
        let (_db, repo) = repo().await;
        let now = Utc::now();

        let first = QueuedTransaction::new("bill", json!({"lines": [1, 2]}), now);
        let mut second = QueuedTransaction::new("product_update", json!({"sku": "A"}), now);
        second.begin_sync().unwrap();
        second.mark_failed("502 Bad Gateway").unwrap();

        repo.replace_all(&[first.clone(), second.clone()]).await.unwrap();
        let loaded = repo.load_all().await.unwrap();

        assert_eq!(loaded, vec![first, second]);
    }

    #[tokio::test]
    async fn test_replace_all_overwrites_previous_snapshot() {
        let (_db, repo) = repo().await;
        let a = QueuedTransaction::new("bill", json!({}), Utc::now());
        let b = QueuedTransaction::new("bill", json!({}), Utc::now());

        repo.replace_all(&[a.clone(), b]).await.unwrap();
        repo.replace_all(&[a.clone()]).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.load_all().await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let (db, repo) = repo().await;
        let good = QueuedTransaction::new("bill", json!({"total": 5}), Utc::now());
        repo.replace_all(&[good.clone()]).await.unwrap();

        for (position, id, payload, created_at, status) in [
            (1, "bad-json", "{not json", "2026-01-01T00:00:00Z", "pending"),
            (2, "bad-date", "{}", "yesterday", "pending"),
            (3, "bad-status", "{}", "2026-01-01T00:00:00Z", "exploded"),
        ] {
            sqlx::query(
                "INSERT INTO transaction_queue \
                 (position, id, kind, payload, created_at, status, attempt_count) \
                 VALUES (?1, ?2, 'bill', ?3, ?4, ?5, 0)",
            )
            .bind(position)
            .bind(id)
            .bind(payload)
            .bind(created_at)
            .bind(status)
            .execute(db.pool())
            .await
            .unwrap();
        }

        assert_eq!(repo.count().await.unwrap(), 4);
        assert_eq!(repo.load_all().await.unwrap(), vec![good]);
    }

    #[test]
    fn test_timestamp_keeps_nanoseconds() {
        let ts = DateTime::parse_from_rfc3339("2026-10-18T09:30:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(encode_timestamp(&ts), "2026-10-18T09:30:00.123456789Z");
    }
}
