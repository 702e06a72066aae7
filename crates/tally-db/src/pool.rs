//! # Snapshot Database
//!
//! Opens the SQLite file that holds the queue snapshot.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Snapshot Database                                  │
//! │                                                                         │
//! │  DbConfig::new(path)       DbConfig::in_memory()                        │
//! │       │                          │                                      │
//! │       └────────────┬─────────────┘                                      │
//! │                    ▼                                                    │
//! │  Database::new(config).await   parent dirs, pool, schema                │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  SqliteSnapshotStore           only writer of transaction_queue         │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  Database::close().await       on agent shutdown                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine and `tally-outbox` may open the same file. WAL lets the tool
//! read while the engine rewrites, and the busy timeout makes a writer wait
//! out the other side's lock instead of failing the snapshot.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::QueueSnapshotRepository;
use crate::schema;

// =============================================================================
// Configuration
// =============================================================================

/// Where the snapshot lives and how the pool talks to it.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Snapshot file. `None` is a private in-memory database.
    pub path: Option<PathBuf>,

    /// Pool size. One writer plus a reader is plenty for a single outbox.
    pub max_connections: u32,

    /// How long a statement waits on another connection's lock.
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// File-backed snapshot. The file and its parent directories are
    /// created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: Some(path.into()),
            max_connections: 2,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Snapshot that disappears with the pool. Tests only.
    pub fn in_memory() -> Self {
        DbConfig {
            path: None,
            // every connection would see its own empty database
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Human-readable location, used in logs and status output.
    pub fn location(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::new().in_memory(true),
        };

        // NORMAL survives an application crash in WAL mode
        options
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the snapshot database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and makes sure the queue table exists.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(location = %config.location(), "Opening snapshot database");

        if let Some(parent) = config.path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            // an in-memory database dies with its last connection
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(config.connect_options())
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        debug!(max_connections = config.max_connections, "Snapshot pool ready");

        schema::ensure_schema(&pool).await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn queue_snapshot(&self) -> QueueSnapshotRepository {
        QueueSnapshotRepository::new(self.pool.clone())
    }

    /// Closes the pool. Later operations fail.
    pub async fn close(&self) {
        info!("Closing snapshot database");
        self.pool.close().await;
    }

    /// True if a trivial query still runs.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
        assert_eq!(db.queue_snapshot().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        assert!(db.health_check().await);
        assert!(path.exists());
        db.close().await;
        assert!(!db.health_check().await);
    }

    #[test]
    fn test_location() {
        let config = DbConfig::new("/var/lib/tally/queue.db").busy_timeout(Duration::from_secs(1));
        assert_eq!(config.location(), "sqlite:/var/lib/tally/queue.db");
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert!(!config.is_in_memory());

        let memory = DbConfig::in_memory();
        assert!(memory.is_in_memory());
        assert_eq!(memory.max_connections, 1);
        assert_eq!(memory.location(), "sqlite::memory:");
    }
}
