//! # tally-sync: Offline Queue Engine
//!
//! This crate lets the POS client keep selling while the backing service
//! is unreachable. Operations that cannot be applied now are queued with a
//! stable idempotency key and replayed, in order, once connectivity
//! returns.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Tally Sync Engine                               │
//! │                                                                         │
//! │  Billing / inventory handler                                           │
//! │       │                                                                 │
//! │       │ agent.is_reachable()? try remote : agent.enqueue(kind, payload)│
//! │       ▼                                                                 │
//! │  ┌──────────────────┐         ┌──────────────────┐                     │
//! │  │ TransactionQueue │◄────────│ SyncCoordinator  │── apply(id, kind,   │
//! │  │ PENDING → ...    │  drain  │ one pass at once │   payload) ──► API  │
//! │  └────────┬─────────┘         └────────▲─────────┘                     │
//! │           │ snapshot                   │ OFFLINE → reachable           │
//! │           ▼                            │                               │
//! │  ┌──────────────────┐         ┌────────┴─────────┐                     │
//! │  │ SnapshotStore    │         │ NetworkMonitor   │ probes every 5s     │
//! │  │ (tally-db)       │         │ ONLINE/UNSTABLE/ │                     │
//! │  └──────────────────┘         │ OFFLINE          │                     │
//! │                               └──────────────────┘                     │
//! │                                                                         │
//! │  Delivery is at-least-once. The remote side deduplicates by id.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `SyncAgent` facade, builder, status and events
//! - [`queue`] - Ordered outbox with durable snapshots
//! - [`monitor`] - Reachability probes and transitions
//! - [`coordinator`] - Drain passes and the `RemoteApply` seam
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_sync::{apply_fn, ApplyOutcome, SyncAgent, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let mut agent = SyncAgent::builder(config)
//!     .with_applier(Arc::new(apply_fn(|id, kind, payload| async move {
//!         api.apply(&id, &kind, payload).await
//!     })))
//!     .build()
//!     .await?;
//! agent.start()?;
//!
//! let id = agent.enqueue("bill", serde_json::json!({"total_cents": 1099})).await;
//! let status = agent.status().await;
//! println!("{} waiting, {} need attention", status.pending_count, status.conflict_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod queue;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncEventEmitter, SyncStatus};
pub use config::{StorageBackend, SyncConfig};
pub use coordinator::{apply_fn, FnApply, RemoteApply, SyncCoordinator};
pub use error::{EngineResult, SyncError};
pub use monitor::{ConnectivityTransition, MonitorConfig, NetworkMonitor, Prober, TcpProber};
pub use queue::{QueueCounts, QueueOptions, TransactionQueue};

// Core types callers need alongside the engine
pub use tally_core::{ApplyOutcome, ConnectivityState, QueuedTransaction, SyncResult, TransactionStatus};
