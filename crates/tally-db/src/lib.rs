//! # tally-db: Snapshot Persistence for the Offline Transaction Queue
//!
//! This crate is the Persistence Adapter. It writes the whole queue as one
//! snapshot and reads it back at process start.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Data Flow                                  │
//! │                                                                         │
//! │  TransactionQueue (tally-sync) - after every mutation                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ SnapshotStore │    │  Database     │    │  Schema      │  │   │
//! │  │   │ (store/)      │    │  (pool.rs)    │    │ (schema.rs)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ Sqlite  ──────┼───►│ SqlitePool    │    │ transaction_ │  │   │
//! │  │   │ JsonFile      │    │ QueueSnapshot-│◄───│ queue table  │  │   │
//! │  │   │ Memory        │    │ Repository    │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        queue.db (SQLite, WAL)   or   queue.json                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - The `SnapshotStore` trait and its implementations
//! - [`pool`] - Connection pool creation and configuration
//! - [`schema`] - Queue table layout
//! - [`repository`] - SQL for reading and replacing the snapshot
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{DbConfig, SnapshotStore, SqliteSnapshotStore};
//!
//! let store = SqliteSnapshotStore::open(DbConfig::new("path/to/queue.db")).await?;
//! store.save(&items).await?;
//! let reloaded = store.load().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod pool;
pub mod repository;
pub mod schema;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::QueueSnapshotRepository;
pub use store::{JsonFileSnapshotStore, MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
