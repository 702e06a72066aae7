//! # Repository Module
//!
//! SQL access for the queue snapshot.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SqliteSnapshotStore                                                   │
//! │       │                                                                 │
//! │       │  db.queue_snapshot().replace_all(&items)                       │
//! │       ▼                                                                 │
//! │  QueueSnapshotRepository                                               │
//! │  ├── replace_all(&self, items)   one transaction: DELETE + INSERTs     │
//! │  ├── load_all(&self)             ordered by position, bad rows skipped │
//! │  └── count(&self)                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite transaction_queue table                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod queue_snapshot;

pub use queue_snapshot::QueueSnapshotRepository;
