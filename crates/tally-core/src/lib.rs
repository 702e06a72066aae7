//! # tally-core: Pure Data Model for the Offline Transaction Queue
//!
//! This crate holds the types every other Tally crate speaks: the queued
//! transaction record, its status state machine, the drain report and the
//! human-facing record numbering. It performs no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Billing / inventory request handlers                 │   │
//! │  │      enqueue() when offline or when the remote call failed      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        tally-sync (queue, monitor, coordinator, agent)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        tally-db (snapshot stores: SQLite, JSON, memory)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │   types • numbering • error                                     │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - QueuedTransaction, statuses, drain report
//! - [`numbering`] - `PREFIX-YYYYMMDD-XXXX` record numbers
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use serde_json::json;
//! use tally_core::{QueuedTransaction, TransactionStatus};
//!
//! let mut tx = QueuedTransaction::new("bill", json!({"total_cents": 1099}), Utc::now());
//! tx.begin_sync().unwrap();
//! tx.mark_failed("503 Service Unavailable").unwrap();
//!
//! assert_eq!(tx.status, TransactionStatus::Failed);
//! assert_eq!(tx.attempt_count, 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod numbering;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use numbering::{generate_record_number, is_offline_number, is_valid_record_number};
pub use types::*;
