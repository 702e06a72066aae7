//! # Domain Types
//!
//! Core types of the offline transaction queue.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │  QueuedTransaction  │   │TransactionStatus│   │  ApplyOutcome   │   │
//! │  │  ─────────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  id (UUID v4)       │   │  Pending        │   │  Synced         │   │
//! │  │  kind ("bill", ..)  │   │  Syncing        │   │  Failed(reason) │   │
//! │  │  payload (opaque)   │   │  Synced         │   │  Conflict(..)   │   │
//! │  │  created_at (order) │   │  Failed         │   └─────────────────┘   │
//! │  │  status             │   │  Conflict       │                         │
//! │  │  attempt_count      │   └─────────────────┘   ┌─────────────────┐   │
//! │  │  last_error         │                         │   SyncResult    │   │
//! │  └─────────────────────┘   ┌─────────────────┐   │  ─────────────  │   │
//! │                            │ConnectivityState│   │  success        │   │
//! │                            │  Online         │   │  synced_count   │   │
//! │                            │  Unstable       │   │  failed_count   │   │
//! │                            │  Offline        │   │  conflicts      │   │
//! │                            └─────────────────┘   │  errors         │   │
//! │                                                  └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status State Machine
//! ```text
//!                 begin_sync()            mark_synced()
//!   ┌─────────┐ ──────────────► ┌─────────┐ ────────────► ┌────────┐
//!   │ PENDING │                 │ SYNCING │               │ SYNCED │ (removed)
//!   └─────────┘ ◄────────────── └─────────┘               └────────┘
//!     ▲   ▲    recover_after_      │     │
//!     │   │    restart()           │     │ mark_conflict()
//!     │   │         mark_failed()  ▼     ▼
//!     │   │                   ┌────────┐ escalate() ┌──────────┐
//!     │   └───────────────────│ FAILED │ ─────────► │ CONFLICT │
//!     │     reset_for_retry() └────────┘            └──────────┘
//!     └─────────────────────────────────────────────────────┘
//!                          reset_for_retry()
//! ```
//!
//! FAILED items are picked up again by the next drain without going back
//! through PENDING; `reset_for_retry()` is the manual path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Transaction Status
// =============================================================================

/// Lifecycle state of a queued transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Waiting for the next drain.
    Pending,
    /// Selected by the coordinator for the running drain pass.
    Syncing,
    /// Applied remotely. Terminal; the item leaves the queue.
    Synced,
    /// Last attempt failed; retried automatically by the next drain.
    Failed,
    /// Remote reported a collision. Waits for manual action.
    Conflict,
}

impl TransactionStatus {
    /// Returns the lowercase wire name used in snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Syncing => "syncing",
            TransactionStatus::Synced => "synced",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Conflict => "conflict",
        }
    }

    /// Returns true if a drain may pick this item up.
    pub fn is_drainable(&self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::Failed)
    }
}

impl Default for TransactionStatus {
    fn default() -> Self {
        TransactionStatus::Pending
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "syncing" => Ok(TransactionStatus::Syncing),
            "synced" => Ok(TransactionStatus::Synced),
            "failed" => Ok(TransactionStatus::Failed),
            "conflict" => Ok(TransactionStatus::Conflict),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

// =============================================================================
// Queued Transaction
// =============================================================================

/// The unit of deferred work.
///
/// `id` is the idempotency key handed to the remote side. It is generated
/// once, here, and survives every retry and every restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueuedTransaction {
    /// Unique identifier (UUID v4). Never reused, never regenerated.
    pub id: String,

    /// Which remote operation this represents: "bill", "product_update", ...
    pub kind: String,

    /// Caller-produced data, passed verbatim to the remote apply.
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,

    /// Enqueue time. The only ordering key.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Current lifecycle state.
    pub status: TransactionStatus,

    /// Remote-apply attempts made so far.
    pub attempt_count: u32,

    /// Failure reason from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl QueuedTransaction {
    /// Creates a PENDING transaction with a fresh identifier.
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        QueuedTransaction {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            created_at,
            status: TransactionStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }

    /// PENDING | FAILED → SYNCING.
    ///
    /// A SYNCING item is accepted too: it was orphaned by a drain that
    /// was dropped before classifying it.
    pub fn begin_sync(&mut self) -> CoreResult<()> {
        match self.status {
            TransactionStatus::Pending
            | TransactionStatus::Failed
            | TransactionStatus::Syncing => {
                self.status = TransactionStatus::Syncing;
                Ok(())
            }
            _ => Err(self.invalid(TransactionStatus::Syncing)),
        }
    }

    /// SYNCING → SYNCED.
    pub fn mark_synced(&mut self) -> CoreResult<()> {
        self.require(TransactionStatus::Syncing, TransactionStatus::Synced)?;
        self.status = TransactionStatus::Synced;
        self.attempt_count += 1;
        self.last_error = None;
        Ok(())
    }

    /// SYNCING → FAILED, counting the attempt.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> CoreResult<()> {
        self.require(TransactionStatus::Syncing, TransactionStatus::Failed)?;
        self.status = TransactionStatus::Failed;
        self.attempt_count += 1;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// SYNCING → CONFLICT, counting the attempt.
    pub fn mark_conflict(&mut self, reason: impl Into<String>) -> CoreResult<()> {
        self.require(TransactionStatus::Syncing, TransactionStatus::Conflict)?;
        self.status = TransactionStatus::Conflict;
        self.attempt_count += 1;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// FAILED → CONFLICT when the automatic retry budget is spent.
    pub fn escalate(&mut self, reason: impl Into<String>) -> CoreResult<()> {
        self.require(TransactionStatus::Failed, TransactionStatus::Conflict)?;
        self.status = TransactionStatus::Conflict;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// FAILED | CONFLICT → PENDING (manual retry).
    pub fn reset_for_retry(&mut self) -> CoreResult<()> {
        match self.status {
            TransactionStatus::Failed | TransactionStatus::Conflict => {
                self.status = TransactionStatus::Pending;
                Ok(())
            }
            _ => Err(self.invalid(TransactionStatus::Pending)),
        }
    }

    /// SYNCING → PENDING on reload.
    ///
    /// Nothing records whether the remote apply finished before the
    /// process died, so the item is offered again. Returns true if the
    /// status changed.
    pub fn recover_after_restart(&mut self) -> bool {
        if self.status == TransactionStatus::Syncing {
            self.status = TransactionStatus::Pending;
            true
        } else {
            false
        }
    }

    fn require(&self, from: TransactionStatus, to: TransactionStatus) -> CoreResult<()> {
        if self.status == from {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    fn invalid(&self, to: TransactionStatus) -> CoreError {
        CoreError::InvalidTransition {
            id: self.id.clone(),
            from: self.status,
            to,
        }
    }
}

// =============================================================================
// Apply Outcome
// =============================================================================

/// What the injected remote-apply reports for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Applied (or recognized as an already-applied duplicate).
    Synced,
    /// Transient failure. Retried by the next drain.
    Failed(String),
    /// The remote holds different data under this id. Needs a human.
    Conflict(String),
}

impl ApplyOutcome {
    /// Shorthand for `ApplyOutcome::Failed`.
    pub fn failed(reason: impl Into<String>) -> Self {
        ApplyOutcome::Failed(reason.into())
    }

    /// Shorthand for `ApplyOutcome::Conflict`.
    pub fn conflict(reason: impl Into<String>) -> Self {
        ApplyOutcome::Conflict(reason.into())
    }
}

// =============================================================================
// Connectivity State
// =============================================================================

/// Tri-state reachability derived by the network monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// Primary probe target answered.
    Online,
    /// Primary failed, secondary answered.
    Unstable,
    /// Neither target answered. Also the state before the first poll.
    #[default]
    Offline,
}

impl ConnectivityState {
    /// Online and Unstable both count as reachable.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ConnectivityState::Offline)
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Unstable => write!(f, "unstable"),
            ConnectivityState::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Drain Report
// =============================================================================

/// Message used when a drain is rejected because another one is running.
pub const ALREADY_IN_PROGRESS: &str = "Sync already in progress";

/// An item that ended a drain pass in CONFLICT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DrainConflict {
    pub id: String,
    pub kind: String,
    pub reason: String,
}

/// Aggregate result of one drain pass.
///
/// Partial success is explicit so the UI can say "12 synced, 1 needs
/// attention" instead of a single pass/fail flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncResult {
    /// True only if every item in the pass ended SYNCED.
    pub success: bool,
    pub synced_count: usize,
    pub failed_count: usize,
    pub conflicts: Vec<DrainConflict>,
    pub errors: Vec<String>,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    /// Starts an empty report.
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        SyncResult {
            success: true,
            synced_count: 0,
            failed_count: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Report for a drain rejected by mutual exclusion. Touches nothing.
    pub fn already_in_progress(at: DateTime<Utc>) -> Self {
        let mut result = Self::begin(at);
        result.success = false;
        result.errors.push(ALREADY_IN_PROGRESS.to_string());
        result
    }

    pub fn record_synced(&mut self) {
        self.synced_count += 1;
    }

    pub fn record_failed(&mut self, id: &str, reason: &str) {
        self.failed_count += 1;
        self.errors.push(format!("{}: {}", id, reason));
    }

    pub fn record_conflict(&mut self, item: &QueuedTransaction, reason: &str) {
        self.conflicts.push(DrainConflict {
            id: item.id.clone(),
            kind: item.kind.clone(),
            reason: reason.to_string(),
        });
    }

    /// Closes the report and computes `success`.
    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self.success = self.failed_count == 0 && self.conflicts.is_empty();
        self
    }

    /// Returns true if this report is a mutual-exclusion rejection.
    pub fn was_rejected(&self) -> bool {
        !self.success
            && self.synced_count == 0
            && self.failed_count == 0
            && self.conflicts.is_empty()
            && self.errors.iter().any(|e| e == ALREADY_IN_PROGRESS)
    }

    /// Number of items this pass processed.
    pub fn processed(&self) -> usize {
        self.synced_count + self.failed_count + self.conflicts.len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> QueuedTransaction {
        QueuedTransaction::new("bill", json!({"total": 1200}), Utc::now())
    }

    #[test]
    fn test_new_transaction_is_pending() {
        let tx = item();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.attempt_count, 0);
        assert!(tx.last_error.is_none());
        assert!(Uuid::parse_str(&tx.id).is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(item().id, item().id);
    }

    #[test]
    fn test_failed_attempt_counts_and_records_error() {
        let mut tx = item();
        tx.begin_sync().unwrap();
        tx.mark_failed("timeout").unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.attempt_count, 1);
        assert_eq!(tx.last_error.as_deref(), Some("timeout"));

        // FAILED is drainable again without a manual reset
        tx.begin_sync().unwrap();
        tx.mark_synced().unwrap();
        assert_eq!(tx.status, TransactionStatus::Synced);
        assert_eq!(tx.attempt_count, 2);
        assert!(tx.last_error.is_none());
    }

    #[test]
    fn test_conflict_is_not_drainable() {
        let mut tx = item();
        tx.begin_sync().unwrap();
        tx.mark_conflict("different total").unwrap();
        assert!(!tx.status.is_drainable());
        assert!(tx.begin_sync().is_err());

        tx.reset_for_retry().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.attempt_count, 1);
    }

    #[test]
    fn test_cannot_complete_without_syncing() {
        let mut tx = item();
        let err = tx.mark_synced().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: TransactionStatus::Pending,
                to: TransactionStatus::Synced,
                ..
            }
        ));
        assert!(tx.reset_for_retry().is_err());
    }

    #[test]
    fn test_escalate_only_from_failed() {
        let mut tx = item();
        assert!(tx.escalate("cap").is_err());
        tx.begin_sync().unwrap();
        tx.mark_failed("503").unwrap();
        tx.escalate("gave up after 1 attempts: 503").unwrap();
        assert_eq!(tx.status, TransactionStatus::Conflict);
    }

    #[test]
    fn test_recover_after_restart() {
        let mut tx = item();
        assert!(!tx.recover_after_restart());
        tx.begin_sync().unwrap();
        assert!(tx.recover_after_restart());
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Syncing,
            TransactionStatus::Synced,
            TransactionStatus::Failed,
            TransactionStatus::Conflict,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("done".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::Conflict).unwrap();
        assert_eq!(json, "\"conflict\"");
    }

    #[test]
    fn test_connectivity_reachability() {
        assert!(ConnectivityState::Online.is_reachable());
        assert!(ConnectivityState::Unstable.is_reachable());
        assert!(!ConnectivityState::Offline.is_reachable());
        assert_eq!(ConnectivityState::default(), ConnectivityState::Offline);
        assert_eq!(ConnectivityState::Unstable.to_string(), "unstable");
    }

    #[test]
    fn test_sync_result_success_rules() {
        let now = Utc::now();
        let empty = SyncResult::begin(now).finish(now);
        assert!(empty.success);
        assert_eq!(empty.processed(), 0);

        let mut partial = SyncResult::begin(now);
        partial.record_synced();
        partial.record_failed("id-2", "503");
        let partial = partial.finish(now);
        assert!(!partial.success);
        assert_eq!(partial.errors, vec!["id-2: 503".to_string()]);
        assert!(!partial.was_rejected());

        let rejected = SyncResult::already_in_progress(now);
        assert!(!rejected.success);
        assert!(rejected.was_rejected());
    }
}
