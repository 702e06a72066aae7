//! # Snapshot Stores
//!
//! The Persistence Adapter: whole-snapshot save and tolerant load of the
//! transaction queue.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SnapshotStore                                     │
//! │                                                                         │
//! │  save(&[QueuedTransaction])                                            │
//! │    • overwrites the previous snapshot completely                       │
//! │    • either the old or the new snapshot survives a crash               │
//! │    • returns Err so the queue can log and count it, never panics       │
//! │                                                                         │
//! │  load() -> Vec<QueuedTransaction>                                      │
//! │    • empty when nothing was saved or the location is unreadable        │
//! │    • skips individually malformed records                              │
//! │    • preserves the saved order                                         │
//! │                                                                         │
//! │  Implementations:                                                      │
//! │    SqliteSnapshotStore     sqlx, one transaction per save              │
//! │    JsonFileSnapshotStore   temp file + fsync + rename                  │
//! │    MemorySnapshotStore     process-local, for tests                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::error::DbResult;
use tally_core::QueuedTransaction;

pub mod json;
pub mod memory;
pub mod sqlite;

pub use json::JsonFileSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

/// Durable home of the queue snapshot.
///
/// The queue is the only caller. Nothing else should write the location a
/// store points at.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replaces the stored snapshot with `items`.
    async fn save(&self, items: &[QueuedTransaction]) -> DbResult<()>;

    /// Reads the most recent snapshot.
    async fn load(&self) -> Vec<QueuedTransaction>;

    /// Human-readable location, for logs and diagnostics.
    fn describe(&self) -> String;
}
