//! # Queue Schema
//!
//! The SQLite layout of the durable queue snapshot.
//!
//! ```text
//! transaction_queue
//! ┌──────────┬──────┬──────┬─────────┬────────────┬────────┬───────────────┬────────────┐
//! │ position │ id   │ kind │ payload │ created_at │ status │ attempt_count │ last_error │
//! ├──────────┼──────┼──────┼─────────┼────────────┼────────┼───────────────┼────────────┤
//! │ 0        │ uuid │ bill │ {json}  │ RFC 3339   │pending │ 0             │ NULL       │
//! └──────────┴──────┴──────┴─────────┴────────────┴────────┴───────────────┴────────────┘
//! ```
//!
//! `position` preserves the in-memory order, which breaks ties between equal
//! `created_at` values. Every column is TEXT/INTEGER without CHECK
//! constraints so that a damaged row is still readable and can be skipped
//! individually on load.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};

/// Name of the snapshot table.
pub const QUEUE_TABLE: &str = "transaction_queue";

const CREATE_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_queue (
    position      INTEGER NOT NULL,
    id            TEXT    NOT NULL PRIMARY KEY,
    kind          TEXT    NOT NULL,
    payload       TEXT    NOT NULL,
    created_at    TEXT    NOT NULL,
    status        TEXT    NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error    TEXT
)
"#;

const CREATE_POSITION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transaction_queue_position ON transaction_queue (position)";

/// Creates the snapshot table if it does not exist.
///
/// Idempotent: safe to run on every connect.
pub async fn ensure_schema(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(CREATE_QUEUE_TABLE)
        .execute(pool)
        .await
        .map_err(|e| DbError::SchemaFailed(e.to_string()))?;

    sqlx::query(CREATE_POSITION_INDEX)
        .execute(pool)
        .await
        .map_err(|e| DbError::SchemaFailed(e.to_string()))?;

    info!(table = QUEUE_TABLE, "Queue schema ready");
    Ok(())
}
