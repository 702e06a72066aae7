//! # Sync Coordinator
//!
//! Drains the queue against the caller's remote apply, one pass at a time.
//!
//! ## Drain Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         drain(apply)                                    │
//! │                                                                         │
//! │  1. draining flag false → true        else: "Sync already in progress" │
//! │                                             (nothing touched)          │
//! │  2. candidates = PENDING + FAILED, by created_at ascending             │
//! │                                                                         │
//! │  3. for each candidate, in order:                                      │
//! │       begin_item      → SYNCING         (skipped if cancelled)         │
//! │       apply(id, kind, payload)  ← no queue lock held, optional timeout │
//! │       complete_item   → SYNCED (removed) | FAILED | CONFLICT           │
//! │                                                                         │
//! │  4. flush snapshot, flag → false                                       │
//! │                                                                         │
//! │  5. SyncResult { success, synced_count, failed_count, conflicts, .. }  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The flag is released by a guard, so a drain future that is dropped
//! mid-pass does not block later drains. Items it left SYNCING are picked
//! up by the next pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::{NoOpEmitter, SyncEventEmitter};
use crate::queue::TransactionQueue;
use tally_core::{ApplyOutcome, QueuedTransaction, SyncResult, TransactionStatus};

// =============================================================================
// Remote Apply
// =============================================================================

/// The caller-owned operation that talks to the remote service.
///
/// Must be idempotent by `id`: after a crash between a successful apply
/// and the next snapshot write, the same item is offered again.
#[async_trait]
pub trait RemoteApply: Send + Sync {
    async fn apply(&self, id: &str, kind: &str, payload: &serde_json::Value) -> ApplyOutcome;
}

/// [`RemoteApply`] over an async closure. See [`apply_fn`].
pub struct FnApply<F>(F);

#[async_trait]
impl<F, Fut> RemoteApply for FnApply<F>
where
    F: Fn(String, String, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = ApplyOutcome> + Send,
{
    async fn apply(&self, id: &str, kind: &str, payload: &serde_json::Value) -> ApplyOutcome {
        (self.0)(id.to_string(), kind.to_string(), payload.clone()).await
    }
}

/// Wraps `|id, kind, payload| async { ... }` as a [`RemoteApply`].
///
/// ```rust,ignore
/// let apply = apply_fn(|id, kind, payload| async move {
///     match api.post(&kind, &id, payload).await {
///         Ok(_) => ApplyOutcome::Synced,
///         Err(e) if e.is_conflict() => ApplyOutcome::conflict(e.to_string()),
///         Err(e) => ApplyOutcome::failed(e.to_string()),
///     }
/// });
/// ```
pub fn apply_fn<F, Fut>(f: F) -> FnApply<F>
where
    F: Fn(String, String, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = ApplyOutcome> + Send,
{
    FnApply(f)
}

// =============================================================================
// Drain Guard
// =============================================================================

struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Coordinator
// =============================================================================

/// Runs drain passes over a [`TransactionQueue`].
pub struct SyncCoordinator {
    queue: Arc<TransactionQueue>,
    apply_timeout: Option<Duration>,
    emitter: Arc<dyn SyncEventEmitter>,
    draining: AtomicBool,
    last_result: RwLock<Option<SyncResult>>,
}

impl SyncCoordinator {
    pub fn new(queue: Arc<TransactionQueue>) -> Self {
        Self::with_options(queue, None, Arc::new(NoOpEmitter))
    }

    /// `apply_timeout` bounds each apply call; `None` waits forever.
    pub fn with_options(
        queue: Arc<TransactionQueue>,
        apply_timeout: Option<Duration>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SyncCoordinator {
            queue,
            apply_timeout,
            emitter,
            draining: AtomicBool::new(false),
            last_result: RwLock::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<TransactionQueue> {
        &self.queue
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Report of the last completed pass. Rejected drains are not recorded.
    pub async fn last_result(&self) -> Option<SyncResult> {
        self.last_result.read().await.clone()
    }

    pub async fn last_drain_time(&self) -> Option<DateTime<Utc>> {
        self.last_result.read().await.as_ref().map(|r| r.finished_at)
    }

    /// Runs one drain pass.
    ///
    /// Returns at once with `success = false` if another pass is running.
    pub async fn drain(&self, apply: &dyn RemoteApply) -> SyncResult {
        let started_at = Utc::now();

        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            info!("Drain rejected: another drain is running");
            return SyncResult::already_in_progress(started_at);
        };

        let candidates = self.queue.drain_candidates().await;
        info!(items = candidates.len(), "Drain started");

        let mut result = SyncResult::begin(started_at);

        for id in candidates {
            let Some(item) = self.queue.begin_item(&id).await else {
                continue;
            };

            debug!(id = %item.id, kind = %item.kind, attempt = item.attempt_count + 1, "Applying");
            let outcome = self.apply_one(apply, &item).await;

            let Some(finished) = self.queue.complete_item(&id, outcome).await else {
                continue;
            };

            match finished.status {
                TransactionStatus::Synced => result.record_synced(),
                TransactionStatus::Failed => {
                    let reason = finished.last_error.as_deref().unwrap_or("unknown error");
                    debug!(id = %id, %reason, "Apply failed, will retry on next drain");
                    result.record_failed(&id, reason);
                }
                TransactionStatus::Conflict => {
                    let reason = finished.last_error.as_deref().unwrap_or("conflict");
                    warn!(id = %id, kind = %finished.kind, %reason, "Transaction needs manual resolution");
                    result.record_conflict(&finished, reason);
                }
                TransactionStatus::Pending | TransactionStatus::Syncing => {}
            }
        }

        self.queue.flush().await;

        let result = result.finish(Utc::now());
        info!(
            success = result.success,
            synced = result.synced_count,
            failed = result.failed_count,
            conflicts = result.conflicts.len(),
            "Drain finished"
        );

        *self.last_result.write().await = Some(result.clone());
        self.emitter.emit_drain(&result);
        result
    }

    async fn apply_one(&self, apply: &dyn RemoteApply, item: &QueuedTransaction) -> ApplyOutcome {
        let call = apply.apply(&item.id, &item.kind, &item.payload);

        match self.apply_timeout {
            None => call.await,
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => ApplyOutcome::failed(format!("timed out after {:?}", limit)),
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
