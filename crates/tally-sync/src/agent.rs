//! # Sync Agent
//!
//! The per-process engine object. Owns the queue, the network monitor and
//! the coordinator, and reacts to connectivity changes.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  enqueue • is_reachable • drain • status • cancel_pending        │  │
//! │  │  retry • resolve • next_record_number • start • stop             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ NetworkMonitor │  │TransactionQueue│  │   SyncCoordinator      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ poll loop      │  │ ordered outbox │  │ one drain at a time    │    │
//! │  │ transitions ───┼──┼───────────┐    │  │ RemoteApply injected   │    │
//! │  └────────────────┘  └───────────┼────┘  └────────────────────────┘    │
//! │                                  ▼                                      │
//! │                        reactor task:                                   │
//! │                        OFFLINE → reachable   drain()                   │
//! │                        reachable → OFFLINE   flush()                   │
//! │                                                                         │
//! │  EVENTS (SyncEventEmitter):                                            │
//! │  ────────────────────────                                              │
//! │  connectivity   - every state transition                               │
//! │  drain          - every completed drain pass                           │
//! │  persist failure - consecutive failed snapshot writes                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::coordinator::{RemoteApply, SyncCoordinator};
use crate::error::{EngineResult, SyncError};
use crate::monitor::{ConnectivityTransition, MonitorConfig, NetworkMonitor, Prober, TcpProber};
use crate::queue::{QueueOptions, TransactionQueue};
use tally_core::{generate_record_number, ConnectivityState, QueuedTransaction, SyncResult};
use tally_db::SnapshotStore;

// =============================================================================
// Sync Status
// =============================================================================

/// Read-only diagnostics for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub connectivity_state: ConnectivityState,

    /// PENDING + SYNCING + FAILED.
    pub pending_count: usize,

    pub failed_count: usize,

    pub conflict_count: usize,

    /// When the last completed drain finished.
    pub last_drain_time: Option<DateTime<Utc>>,

    pub last_drain_success: Option<bool>,

    pub is_draining: bool,

    /// Consecutive failed snapshot writes.
    pub persist_failures: u32,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives engine events (UI notifications, metrics).
pub trait SyncEventEmitter: Send + Sync {
    /// A connectivity state change.
    fn emit_connectivity(&self, transition: &ConnectivityTransition);

    /// A completed drain pass.
    fn emit_drain(&self, result: &SyncResult);

    /// A failed snapshot write, with the current failure streak.
    fn emit_persist_failure(&self, consecutive: u32, error: &str);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_connectivity(&self, _transition: &ConnectivityTransition) {}
    fn emit_drain(&self, _result: &SyncResult) {}
    fn emit_persist_failure(&self, _consecutive: u32, _error: &str) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Offline queue engine for one process.
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    queue: Arc<TransactionQueue>,
    coordinator: Arc<SyncCoordinator>,
    monitor: NetworkMonitor,
    applier: Option<Arc<dyn RemoteApply>>,
    emitter: Arc<dyn SyncEventEmitter>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    reactor: Option<JoinHandle<()>>,
}

impl SyncAgent {
    /// Shorthand for `SyncAgentBuilder::new(config)`.
    pub fn builder(config: SyncConfig) -> SyncAgentBuilder {
        SyncAgentBuilder::new(config)
    }

    // =========================================================================
    // Producer API
    // =========================================================================

    /// Queues a remote operation and returns its idempotency key.
    pub async fn enqueue(&self, kind: impl Into<String>, payload: serde_json::Value) -> String {
        self.queue.enqueue(kind, payload).await
    }

    /// Last known reachability. Never blocks.
    pub fn is_reachable(&self) -> bool {
        self.monitor.is_reachable()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor.state()
    }

    /// Mints a human-facing record number, using the offline prefix while
    /// the remote is unreachable.
    pub fn next_record_number(&self) -> EngineResult<String> {
        let numbering = &self.config.numbering;
        let prefix = if self.is_reachable() {
            &numbering.online_prefix
        } else {
            &numbering.offline_prefix
        };
        Ok(generate_record_number(prefix)?)
    }

    /// Returns true if `number` was minted with the offline prefix.
    pub fn is_offline_number(&self, number: &str) -> bool {
        tally_core::is_offline_number(number, &self.config.numbering.offline_prefix)
    }

    // =========================================================================
    // Drains
    // =========================================================================

    /// Drains with the applier given to the builder.
    pub async fn drain(&self) -> EngineResult<SyncResult> {
        let applier = self.applier.as_ref().ok_or(SyncError::NoApplier)?;
        Ok(self.coordinator.drain(applier.as_ref()).await)
    }

    /// Drains with an explicit applier.
    pub async fn drain_with(&self, apply: &dyn RemoteApply) -> SyncResult {
        self.coordinator.drain(apply).await
    }

    // =========================================================================
    // Manual Actions & Diagnostics
    // =========================================================================

    pub async fn cancel_pending(&self, id: &str) -> bool {
        self.queue.cancel_pending(id).await
    }

    pub async fn retry(&self, id: &str) -> EngineResult<()> {
        self.queue.retry(id).await
    }

    pub async fn resolve(&self, id: &str) -> EngineResult<QueuedTransaction> {
        self.queue.resolve(id).await
    }

    pub async fn items(&self) -> Vec<QueuedTransaction> {
        self.queue.items().await
    }

    pub async fn get(&self, id: &str) -> Option<QueuedTransaction> {
        self.queue.get(id).await
    }

    pub async fn status(&self) -> SyncStatus {
        let counts = self.queue.counts().await;
        let last = self.coordinator.last_result().await;

        SyncStatus {
            connectivity_state: self.monitor.state(),
            pending_count: counts.outstanding(),
            failed_count: counts.failed,
            conflict_count: counts.conflict,
            last_drain_time: last.as_ref().map(|r| r.finished_at),
            last_drain_success: last.as_ref().map(|r| r.success),
            is_draining: self.coordinator.is_draining(),
            persist_failures: self.queue.persist_failures(),
        }
    }

    pub fn queue(&self) -> &Arc<TransactionQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the network monitor and the reactor task.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.shutdown_tx.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let transitions = self.monitor.start()?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        self.reactor = Some(tokio::spawn(Self::react(
            transitions,
            shutdown_rx,
            self.queue.clone(),
            self.coordinator.clone(),
            self.applier.clone(),
            self.emitter.clone(),
            self.config.sync.drain_on_start,
        )));
        self.shutdown_tx = Some(shutdown_tx);

        info!(store = %self.queue.store_location(), "Sync agent started");
        Ok(())
    }

    /// Stops polling, waits for a running drain to finish, then flushes.
    pub async fn stop(&mut self) {
        info!("Stopping sync agent");

        self.monitor.stop().await;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(reactor) = self.reactor.take() {
            if let Err(e) = reactor.await {
                error!(error = %e, "Reactor task ended abnormally");
            }
        }

        self.queue.flush().await;
        info!("Sync agent stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Acts on connectivity transitions until shutdown.
    ///
    /// Reconnect drains run in their own task so a long pass never delays
    /// the next transition. At most one is in flight; a second reconnect
    /// while it runs is skipped.
    async fn react(
        mut transitions: mpsc::UnboundedReceiver<ConnectivityTransition>,
        mut shutdown_rx: mpsc::Receiver<()>,
        queue: Arc<TransactionQueue>,
        coordinator: Arc<SyncCoordinator>,
        applier: Option<Arc<dyn RemoteApply>>,
        emitter: Arc<dyn SyncEventEmitter>,
        drain_on_start: bool,
    ) {
        let mut drain_task: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,

                joined = join_drain(&mut drain_task) => {
                    drain_task = None;
                    log_drain_exit(joined);
                }

                transition = transitions.recv() => {
                    let Some(transition) = transition else { break };
                    emitter.emit_connectivity(&transition);

                    if transition.went_offline() {
                        debug!("Connectivity lost, flushing queue snapshot");
                        queue.flush().await;
                    } else if transition.became_reachable() {
                        if transition.initial && !drain_on_start {
                            debug!("Reachable at startup, drain_on_start disabled");
                            continue;
                        }
                        let Some(applier) = applier.clone() else {
                            debug!("Reachable again, but no applier configured");
                            continue;
                        };
                        if drain_task.is_some() {
                            debug!("Reconnect drain still running");
                            continue;
                        }

                        let coordinator = coordinator.clone();
                        drain_task = Some(tokio::spawn(async move {
                            coordinator.drain(applier.as_ref()).await;
                        }));
                    }
                }
            }
        }

        if let Some(task) = drain_task.take() {
            debug!("Waiting for reconnect drain to finish");
            log_drain_exit(task.await);
        }

        debug!("Reactor stopped");
    }
}

/// Resolves when the running drain task ends. Never resolves when idle.
async fn join_drain(task: &mut Option<JoinHandle<()>>) -> Result<(), JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn log_drain_exit(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Reconnect drain aborted; items it held stay queued");
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncAgent with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    store: Option<Arc<dyn SnapshotStore>>,
    prober: Option<Arc<dyn Prober>>,
    applier: Option<Arc<dyn RemoteApply>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            store: None,
            prober: None,
            applier: None,
            emitter: None,
        }
    }

    /// Uses this store instead of the one named in `[storage]`.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the TCP prober.
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Sets the applier used by `drain()` and by reconnect drains.
    pub fn with_applier(mut self, applier: Arc<dyn RemoteApply>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Validates the config, opens the store and loads the queue.
    pub async fn build(self) -> EngineResult<SyncAgent> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => self.config.storage.open_store().await?,
        };
        let prober = self.prober.unwrap_or_else(|| Arc::new(TcpProber));
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        let options = QueueOptions {
            max_attempts: self.config.queue.max_attempts,
        };
        let queue = Arc::new(TransactionQueue::open_with(store, options, emitter.clone()).await);
        let coordinator = Arc::new(SyncCoordinator::with_options(
            queue.clone(),
            self.config.sync.apply_timeout(),
            emitter.clone(),
        ));
        let monitor = NetworkMonitor::new(MonitorConfig::from(&self.config.monitor), prober);

        Ok(SyncAgent {
            config: Arc::new(self.config),
            queue,
            coordinator,
            monitor,
            applier: self.applier,
            emitter,
            shutdown_tx: None,
            reactor: None,
        })
    }
}
