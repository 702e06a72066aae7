//! # Transaction Queue
//!
//! The in-memory, ordered outbox and its durable snapshot.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      TransactionQueue                                   │
//! │                                                                         │
//! │  Mutex<Vec<QueuedTransaction>>   ← authoritative for the process life  │
//! │       │                                                                 │
//! │       │ every mutation, before the call returns:                       │
//! │       ▼                                                                 │
//! │  SnapshotStore::save(whole vec)  ← failure: warn!, count, carry on     │
//! │                                                                         │
//! │  enqueue ─────────► push PENDING at the tail, save, return id          │
//! │  cancel_pending ──► remove PENDING/FAILED, save                        │
//! │  retry ───────────► FAILED/CONFLICT → PENDING, save                    │
//! │  resolve ─────────► remove CONFLICT, save                              │
//! │                                                                         │
//! │  Drain steps (coordinator only):                                       │
//! │  drain_candidates → begin_item → complete_item ... → flush             │
//! │  SYNCING marks and outcomes live in memory until the final flush.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock is held across the snapshot write so snapshots are written in
//! the same order as the mutations they capture. It is never held across a
//! remote apply.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::agent::{NoOpEmitter, SyncEventEmitter};
use crate::error::{EngineResult, SyncError};
use tally_core::{ApplyOutcome, QueuedTransaction, TransactionStatus};
use tally_db::SnapshotStore;

// =============================================================================
// Options & Counts
// =============================================================================

/// Queue policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// FAILED items reaching this many attempts are escalated to CONFLICT.
    /// 0 retries forever.
    pub max_attempts: u32,
}

/// Items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub conflict: usize,
}

impl QueueCounts {
    /// Items still waiting to reach the remote: PENDING + SYNCING + FAILED.
    pub fn outstanding(&self) -> usize {
        self.pending + self.syncing + self.failed
    }

    pub fn total(&self) -> usize {
        self.outstanding() + self.conflict
    }
}

// =============================================================================
// Transaction Queue
// =============================================================================

/// Ordered outbox of deferred remote operations.
pub struct TransactionQueue {
    items: Mutex<Vec<QueuedTransaction>>,
    store: Arc<dyn SnapshotStore>,
    options: QueueOptions,
    emitter: Arc<dyn SyncEventEmitter>,
    persist_failures: AtomicU32,
}

impl TransactionQueue {
    /// Loads the queue from `store` with default options.
    pub async fn open(store: Arc<dyn SnapshotStore>) -> Self {
        Self::open_with(store, QueueOptions::default(), Arc::new(NoOpEmitter)).await
    }

    /// Loads the queue from `store`.
    ///
    /// Items saved while SYNCING go back to PENDING: nothing says whether
    /// their remote apply finished before the previous process stopped.
    pub async fn open_with(
        store: Arc<dyn SnapshotStore>,
        options: QueueOptions,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let loaded = store.load().await;
        let loaded_count = loaded.len();

        let mut seen = HashSet::new();
        let mut recovered = 0usize;
        let mut items = Vec::with_capacity(loaded.len());

        for mut item in loaded {
            if item.status == TransactionStatus::Synced {
                debug!(id = %item.id, "Dropping already-synced record from snapshot");
                continue;
            }
            if !seen.insert(item.id.clone()) {
                warn!(id = %item.id, "Dropping duplicate record from snapshot");
                continue;
            }
            if item.recover_after_restart() {
                recovered += 1;
            }
            items.push(item);
        }

        let queue = TransactionQueue {
            items: Mutex::new(items),
            store,
            options,
            emitter,
            persist_failures: AtomicU32::new(0),
        };

        {
            let items = queue.items.lock().await;
            info!(
                store = %queue.store.describe(),
                loaded = items.len(),
                recovered,
                "Transaction queue opened"
            );
            if recovered > 0 || items.len() != loaded_count {
                queue.persist(&items).await;
            }
        }

        queue
    }

    // =========================================================================
    // Producer API
    // =========================================================================

    /// Appends a PENDING item and returns its id.
    ///
    /// Never fails: a snapshot write failure is logged and counted, and the
    /// item stays queued in memory.
    pub async fn enqueue(&self, kind: impl Into<String>, payload: serde_json::Value) -> String {
        let mut items = self.items.lock().await;

        // Never earlier than anything already queued, even if the wall
        // clock stepped back
        let now = Utc::now();
        let created_at = items
            .iter()
            .map(|item| item.created_at)
            .max()
            .map_or(now, |latest| latest.max(now));

        let item = QueuedTransaction::new(kind, payload, created_at);
        let id = item.id.clone();
        debug!(id = %id, kind = %item.kind, "Enqueued transaction");
        items.push(item);

        self.persist(&items).await;
        id
    }

    /// Removes a PENDING or FAILED item. Returns false if there is no such
    /// item or it is SYNCING or in CONFLICT.
    pub async fn cancel_pending(&self, id: &str) -> bool {
        let mut items = self.items.lock().await;

        let Some(pos) = items.iter().position(|item| item.id == id) else {
            debug!(id, "Cancel ignored: not queued");
            return false;
        };

        if !items[pos].status.is_drainable() {
            debug!(id, status = %items[pos].status, "Cancel refused");
            return false;
        }

        items.remove(pos);
        info!(id, "Queued transaction cancelled");
        self.persist(&items).await;
        true
    }

    /// FAILED | CONFLICT → PENDING.
    pub async fn retry(&self, id: &str) -> EngineResult<()> {
        let mut items = self.items.lock().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| SyncError::NotFound { id: id.to_string() })?;

        item.reset_for_retry()?;
        info!(id, attempts = item.attempt_count, "Transaction re-queued");

        self.persist(&items).await;
        Ok(())
    }

    /// Removes a CONFLICT item after manual resolution and returns it.
    pub async fn resolve(&self, id: &str) -> EngineResult<QueuedTransaction> {
        let mut items = self.items.lock().await;
        let pos = items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| SyncError::NotFound { id: id.to_string() })?;

        if items[pos].status != TransactionStatus::Conflict {
            return Err(SyncError::InvalidState {
                id: id.to_string(),
                status: items[pos].status,
                action: "resolve",
            });
        }

        let item = items.remove(pos);
        info!(id, kind = %item.kind, "Conflict resolved");

        self.persist(&items).await;
        Ok(item)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: &str) -> Option<QueuedTransaction> {
        self.items.lock().await.iter().find(|item| item.id == id).cloned()
    }

    /// Copy of every queued item, in queue order.
    pub async fn items(&self) -> Vec<QueuedTransaction> {
        self.items.lock().await.clone()
    }

    pub async fn counts(&self) -> QueueCounts {
        let items = self.items.lock().await;
        let mut counts = QueueCounts::default();
        for item in items.iter() {
            match item.status {
                TransactionStatus::Pending => counts.pending += 1,
                TransactionStatus::Syncing => counts.syncing += 1,
                TransactionStatus::Failed => counts.failed += 1,
                TransactionStatus::Conflict => counts.conflict += 1,
                TransactionStatus::Synced => {}
            }
        }
        counts
    }

    /// PENDING + SYNCING + FAILED.
    pub async fn pending_count(&self) -> usize {
        self.counts().await.outstanding()
    }

    /// Consecutive failed snapshot writes. Reset by the next good write.
    pub fn persist_failures(&self) -> u32 {
        self.persist_failures.load(Ordering::SeqCst)
    }

    /// Describes the backing store.
    pub fn store_location(&self) -> String {
        self.store.describe()
    }

    /// Writes the current snapshot now. Returns false if the write failed.
    pub async fn flush(&self) -> bool {
        let items = self.items.lock().await;
        self.persist(&items).await
    }

    // =========================================================================
    // Drain Steps
    // =========================================================================

    /// Ids a drain pass should process, oldest first.
    ///
    /// PENDING and FAILED items, plus SYNCING items orphaned by a pass that
    /// never finished. The sort is stable, so equal timestamps keep queue
    /// order.
    pub(crate) async fn drain_candidates(&self) -> Vec<String> {
        let items = self.items.lock().await;
        let mut candidates: Vec<&QueuedTransaction> = items
            .iter()
            .filter(|item| item.status.is_drainable() || item.status == TransactionStatus::Syncing)
            .collect();
        candidates.sort_by_key(|item| item.created_at);
        candidates.into_iter().map(|item| item.id.clone()).collect()
    }

    /// Marks one item SYNCING and returns a copy to apply.
    ///
    /// `None` if the item left the queue (or became non-drainable) since
    /// the candidates were taken.
    pub(crate) async fn begin_item(&self, id: &str) -> Option<QueuedTransaction> {
        let mut items = self.items.lock().await;
        let item = items.iter_mut().find(|item| item.id == id)?;
        match item.begin_sync() {
            Ok(()) => Some(item.clone()),
            Err(e) => {
                debug!(id, error = %e, "Skipping item no longer drainable");
                None
            }
        }
    }

    /// Records the outcome of one apply and returns the item's final state.
    ///
    /// SYNCED items are removed. A FAILED item that has used up
    /// `max_attempts` is escalated to CONFLICT.
    pub(crate) async fn complete_item(
        &self,
        id: &str,
        outcome: ApplyOutcome,
    ) -> Option<QueuedTransaction> {
        let mut items = self.items.lock().await;
        let pos = items.iter().position(|item| item.id == id)?;
        let item = &mut items[pos];

        let transition = match outcome {
            ApplyOutcome::Synced => item.mark_synced(),
            ApplyOutcome::Failed(reason) => item.mark_failed(reason),
            ApplyOutcome::Conflict(reason) => item.mark_conflict(reason),
        };
        if let Err(e) = transition {
            error!(id, error = %e, "Apply outcome does not fit item state");
            return None;
        }

        let cap = self.options.max_attempts;
        if item.status == TransactionStatus::Failed && cap > 0 && item.attempt_count >= cap {
            let reason = format!(
                "gave up after {} attempts: {}",
                item.attempt_count,
                item.last_error.as_deref().unwrap_or("unknown error")
            );
            warn!(id, attempts = item.attempt_count, "Retry budget spent, escalating to conflict");
            if let Err(e) = item.escalate(reason) {
                error!(id, error = %e, "Escalation failed");
            }
        }

        let finished = item.clone();
        if finished.status == TransactionStatus::Synced {
            items.remove(pos);
        }
        Some(finished)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn persist(&self, items: &[QueuedTransaction]) -> bool {
        match self.store.save(items).await {
            Ok(()) => {
                let previous = self.persist_failures.swap(0, Ordering::SeqCst);
                if previous > 0 {
                    info!(previous_failures = previous, "Queue snapshot writes recovered");
                }
                true
            }
            Err(e) => {
                let consecutive = self.persist_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    store = %self.store.describe(),
                    error = %e,
                    consecutive,
                    "Failed to persist queue snapshot"
                );
                self.emitter.emit_persist_failure(consecutive, &e.to_string());
                false
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_db::MemorySnapshotStore;

    async fn queue_with(store: Arc<MemorySnapshotStore>, max_attempts: u32) -> TransactionQueue {
        TransactionQueue::open_with(store, QueueOptions { max_attempts }, Arc::new(NoOpEmitter)).await
    }

    /// Runs one item through begin + complete.
    async fn settle(queue: &TransactionQueue, id: &str, outcome: ApplyOutcome) -> QueuedTransaction {
        queue.begin_item(id).await.unwrap();
        queue.complete_item(id, outcome).await.unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_persists_before_returning() {
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = queue_with(store.clone(), 0).await;

        let id = queue.enqueue("bill", json!({"total": 10})).await;

        let saved = store.snapshot();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, id);
        assert_eq!(saved[0].status, TransactionStatus::Pending);
        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_created_at_is_monotonic() {
        let store = Arc::new(MemorySnapshotStore::new());
        let future = Utc::now() + chrono::Duration::hours(1);
        let ahead = QueuedTransaction::new("bill", json!({}), future);
        store.save(&[ahead]).await.unwrap();

        let queue = queue_with(store, 0).await;
        let id = queue.enqueue("bill", json!({})).await;

        let item = queue.get(&id).await.unwrap();
        assert!(item.created_at >= future);
        assert_eq!(queue.drain_candidates().await.last(), Some(&id));
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_not_raised() {
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = queue_with(store.clone(), 0).await;

        store.set_fail_writes(true);
        let id = queue.enqueue("bill", json!({})).await;
        queue.enqueue("bill", json!({})).await;

        assert_eq!(queue.persist_failures(), 2);
        assert!(queue.get(&id).await.is_some());
        assert!(store.snapshot().is_empty());

        store.set_fail_writes(false);
        assert!(queue.flush().await);
        assert_eq!(queue.persist_failures(), 0);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_open_recovers_syncing_items() {
        let mut orphan = QueuedTransaction::new("bill", json!({}), Utc::now());
        orphan.begin_sync().unwrap();
        let mut done = QueuedTransaction::new("bill", json!({}), Utc::now());
        done.begin_sync().unwrap();
        done.mark_synced().unwrap();
        let store = Arc::new(MemorySnapshotStore::with_items(vec![
            orphan.clone(),
            orphan.clone(),
            done,
        ]));

        let queue = queue_with(store.clone(), 0).await;

        let items = queue.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, orphan.id);
        assert_eq!(items[0].status, TransactionStatus::Pending);
        // Normalized snapshot written back
        assert_eq!(store.snapshot(), items);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = queue_with(store.clone(), 0).await;
        let pending = queue.enqueue("bill", json!({})).await;
        let failed = queue.enqueue("bill", json!({})).await;
        let conflict = queue.enqueue("bill", json!({})).await;
        let syncing = queue.enqueue("bill", json!({})).await;

        settle(&queue, &failed, ApplyOutcome::failed("503")).await;
        settle(&queue, &conflict, ApplyOutcome::conflict("different total")).await;
        queue.begin_item(&syncing).await.unwrap();

        assert!(queue.cancel_pending(&pending).await);
        assert!(queue.cancel_pending(&failed).await);
        assert!(!queue.cancel_pending(&conflict).await);
        assert!(!queue.cancel_pending(&syncing).await);
        assert!(!queue.cancel_pending("no-such-id").await);

        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_and_resolve() {
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = queue_with(store, 0).await;
        let a = queue.enqueue("bill", json!({})).await;
        let b = queue.enqueue("bill", json!({})).await;

        assert!(matches!(queue.retry(&a).await, Err(SyncError::InvalidState { .. })));
        assert!(matches!(queue.retry("nope").await, Err(SyncError::NotFound { .. })));

        settle(&queue, &a, ApplyOutcome::conflict("dup")).await;
        queue.retry(&a).await.unwrap();
        assert_eq!(queue.get(&a).await.unwrap().status, TransactionStatus::Pending);

        assert!(matches!(queue.resolve(&b).await, Err(SyncError::InvalidState { .. })));
        settle(&queue, &b, ApplyOutcome::conflict("dup")).await;
        let resolved = queue.resolve(&b).await.unwrap();
        assert_eq!(resolved.id, b);
        assert!(queue.get(&b).await.is_none());
    }

    #[tokio::test]
    async fn test_attempt_cap_escalates() {
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = queue_with(store, 2).await;
        let id = queue.enqueue("bill", json!({})).await;

        let first = settle(&queue, &id, ApplyOutcome::failed("503")).await;
        assert_eq!(first.status, TransactionStatus::Failed);

        let second = settle(&queue, &id, ApplyOutcome::failed("503")).await;
        assert_eq!(second.status, TransactionStatus::Conflict);
        assert_eq!(second.attempt_count, 2);
        assert_eq!(
            second.last_error.as_deref(),
            Some("gave up after 2 attempts: 503")
        );
        assert!(queue.drain_candidates().await.is_empty());
    }

    #[tokio::test]
    async fn test_synced_item_is_removed() {
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = queue_with(store, 0).await;
        let id = queue.enqueue("bill", json!({})).await;

        let done = settle(&queue, &id, ApplyOutcome::Synced).await;
        assert_eq!(done.status, TransactionStatus::Synced);
        assert!(queue.get(&id).await.is_none());
        assert!(queue.begin_item(&id).await.is_none());
        assert!(queue.complete_item(&id, ApplyOutcome::Synced).await.is_none());
    }

    #[tokio::test]
    async fn test_counts() {
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = queue_with(store, 0).await;
        let a = queue.enqueue("bill", json!({})).await;
        let b = queue.enqueue("bill", json!({})).await;
        queue.enqueue("bill", json!({})).await;

        settle(&queue, &a, ApplyOutcome::failed("503")).await;
        settle(&queue, &b, ApplyOutcome::conflict("dup")).await;

        let counts = queue.counts().await;
        assert_eq!(
            counts,
            QueueCounts { pending: 1, syncing: 0, failed: 1, conflict: 1 }
        );
        assert_eq!(counts.outstanding(), 2);
        assert_eq!(counts.total(), 3);
    }
}
