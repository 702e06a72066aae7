//! # Network State Monitor
//!
//! Background reachability polling with a tri-state result.
//!
//! ## Poll Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Network Monitor Loop                              │
//! │                                                                         │
//! │  every poll_interval (5s):                                             │
//! │                                                                         │
//! │    probe(primary, 3s) ──ok──► ONLINE                                   │
//! │          │                                                              │
//! │         fail                                                            │
//! │          ▼                                                              │
//! │    probe(secondary, 3s) ──ok──► UNSTABLE                               │
//! │          │                                                              │
//! │         fail                                                            │
//! │          ▼                                                              │
//! │       OFFLINE                                                          │
//! │                                                                         │
//! │  new state != previous state ?                                         │
//! │       yes → publish on the watch channel                               │
//! │             send ConnectivityTransition { from, to }                   │
//! │       no  → nothing                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! ```text
//!   NetworkMonitor::new()  ──►  start()  ──►  [poll loop task]  ──►  stop()
//!                                  │                                  │
//!                                  └── transitions receiver           └── abandons an
//!                                                                         in-flight probe
//! ```
//!
//! The state starts as OFFLINE, so the first poll that reaches anything
//! produces a transition. Connectivity errors never leave this module;
//! they only show up as states.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::MonitorSettings;
use crate::error::{EngineResult, SyncError};
use tally_core::ConnectivityState;

// =============================================================================
// Prober
// =============================================================================

/// One reachability check against one `host:port` target.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns true if `target` answered within `timeout`.
    async fn probe(&self, target: &str, timeout: Duration) -> bool;
}

/// Opens (and immediately drops) a TCP connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                trace!(target, error = %e, "Probe refused");
                false
            }
            Err(_) => {
                trace!(target, ?timeout, "Probe timed out");
                false
            }
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub primary_target: String,
    pub secondary_target: String,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig::from(&MonitorSettings::default())
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        MonitorConfig {
            primary_target: settings.primary_target.clone(),
            secondary_target: settings.secondary_target.clone(),
            poll_interval: settings.poll_interval(),
            probe_timeout: settings.probe_timeout(),
        }
    }
}

// =============================================================================
// Transition Events
// =============================================================================

/// A change of connectivity state, observed by one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityTransition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
    pub at: DateTime<Utc>,
    /// Produced by the first poll after the monitor was created.
    pub initial: bool,
}

impl ConnectivityTransition {
    /// OFFLINE → ONLINE | UNSTABLE.
    pub fn became_reachable(&self) -> bool {
        !self.from.is_reachable() && self.to.is_reachable()
    }

    /// ONLINE | UNSTABLE → OFFLINE.
    pub fn went_offline(&self) -> bool {
        self.from.is_reachable() && !self.to.is_reachable()
    }
}

// =============================================================================
// Network Monitor
// =============================================================================

struct MonitorShared {
    config: MonitorConfig,
    prober: Arc<dyn Prober>,
    state_tx: watch::Sender<ConnectivityState>,
    polled: AtomicBool,
}

impl MonitorShared {
    async fn probe_state(&self) -> ConnectivityState {
        let timeout = self.config.probe_timeout;

        if self.prober.probe(&self.config.primary_target, timeout).await {
            ConnectivityState::Online
        } else if self.prober.probe(&self.config.secondary_target, timeout).await {
            ConnectivityState::Unstable
        } else {
            ConnectivityState::Offline
        }
    }

    async fn poll_once(&self) -> Option<ConnectivityTransition> {
        let state = self.probe_state().await;

        // Nothing below awaits, so an abandoned poll never half-updates
        let initial = !self.polled.swap(true, Ordering::SeqCst);
        let mut previous = state;
        self.state_tx.send_if_modified(|current| {
            previous = *current;
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        if previous == state {
            trace!(%state, "Connectivity unchanged");
            return None;
        }

        info!(from = %previous, to = %state, "Connectivity changed");
        Some(ConnectivityTransition {
            from: previous,
            to: state,
            at: Utc::now(),
            initial,
        })
    }
}

/// Periodic reachability monitor.
///
/// One per process, owned by the [`SyncAgent`](crate::agent::SyncAgent).
pub struct NetworkMonitor {
    shared: Arc<MonitorShared>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl NetworkMonitor {
    /// Creates a stopped monitor in the OFFLINE state.
    pub fn new(config: MonitorConfig, prober: Arc<dyn Prober>) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Offline);

        NetworkMonitor {
            shared: Arc::new(MonitorShared {
                config,
                prober,
                state_tx,
                polled: AtomicBool::new(false),
            }),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Last observed state. Never blocks.
    pub fn state(&self) -> ConnectivityState {
        *self.shared.state_tx.borrow()
    }

    /// True for ONLINE and UNSTABLE. Never blocks.
    pub fn is_reachable(&self) -> bool {
        self.state().is_reachable()
    }

    /// Watches the state without consuming transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.shared.state_tx.subscribe()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Runs one poll now and returns the transition it caused, if any.
    ///
    /// Transitions found this way are not sent to the `start()` receiver.
    pub async fn poll_once(&self) -> Option<ConnectivityTransition> {
        self.shared.poll_once().await
    }

    /// Spawns the poll loop.
    ///
    /// Returns the receiver of state transitions, one event per change.
    pub fn start(&mut self) -> EngineResult<mpsc::UnboundedReceiver<ConnectivityTransition>> {
        if self.is_running() {
            return Err(SyncError::AlreadyRunning);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        info!(
            primary = %self.shared.config.primary_target,
            secondary = %self.shared.config.secondary_target,
            interval = ?self.shared.config.poll_interval,
            "Network monitor starting"
        );

        self.task = Some(tokio::spawn(Self::run(
            self.shared.clone(),
            events_tx,
            shutdown_rx,
        )));
        self.shutdown_tx = Some(shutdown_tx);

        Ok(events_rx)
    }

    /// Stops the poll loop and waits for it to exit.
    ///
    /// An in-flight probe is abandoned; the published state is left as it
    /// was after the last completed poll.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "Monitor task ended abnormally");
            }
        }
    }

    async fn run(
        shared: Arc<MonitorShared>,
        events_tx: mpsc::UnboundedSender<ConnectivityTransition>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(shared.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,

                _ = interval.tick() => {
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.recv() => {
                            debug!("Abandoning in-flight probe");
                            break;
                        }

                        transition = shared.poll_once() => {
                            if let Some(transition) = transition {
                                if events_tx.send(transition).is_err() {
                                    debug!("Transition receiver dropped");
                                }
                            }
                        }
                    }
                }
            }
        }

        info!("Network monitor stopped");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Answers from two switches, one per target.
    #[derive(Default)]
    struct SwitchProber {
        primary_up: AtomicBool,
        secondary_up: AtomicBool,
        hang: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for SwitchProber {
        async fn probe(&self, target: &str, _timeout: Duration) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if target == "primary:1" {
                self.primary_up.load(Ordering::SeqCst)
            } else {
                self.secondary_up.load(Ordering::SeqCst)
            }
        }
    }

    fn monitor(prober: Arc<SwitchProber>) -> NetworkMonitor {
        let config = MonitorConfig {
            primary_target: "primary:1".into(),
            secondary_target: "secondary:1".into(),
            poll_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
        };
        NetworkMonitor::new(config, prober)
    }

    #[tokio::test]
    async fn test_tri_state_classification() {
        let prober = Arc::new(SwitchProber::default());
        let monitor = monitor(prober.clone());
        assert_eq!(monitor.state(), ConnectivityState::Offline);

        // Unchanged OFFLINE is not a transition
        assert_eq!(monitor.poll_once().await, None);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);

        prober.secondary_up.store(true, Ordering::SeqCst);
        let t = monitor.poll_once().await.unwrap();
        assert_eq!((t.from, t.to), (ConnectivityState::Offline, ConnectivityState::Unstable));
        assert!(t.became_reachable());
        assert!(!t.initial);
        assert!(monitor.is_reachable());

        prober.primary_up.store(true, Ordering::SeqCst);
        let t = monitor.poll_once().await.unwrap();
        assert_eq!(t.to, ConnectivityState::Online);
        assert!(!t.became_reachable());
        assert!(!t.went_offline());

        prober.primary_up.store(false, Ordering::SeqCst);
        prober.secondary_up.store(false, Ordering::SeqCst);
        let t = monitor.poll_once().await.unwrap();
        assert!(t.went_offline());
        assert!(!monitor.is_reachable());
    }

    #[tokio::test]
    async fn test_first_poll_is_marked_initial() {
        let prober = Arc::new(SwitchProber::default());
        prober.primary_up.store(true, Ordering::SeqCst);
        let monitor = monitor(prober.clone());

        let t = monitor.poll_once().await.unwrap();
        assert!(t.initial);
        // Primary answered, secondary was never asked
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_emits_one_event_per_change() {
        let prober = Arc::new(SwitchProber::default());
        let mut monitor = monitor(prober.clone());
        let mut state_rx = monitor.subscribe();
        let mut events = monitor.start().unwrap();
        assert!(monitor.is_running());
        assert!(matches!(monitor.start(), Err(SyncError::AlreadyRunning)));

        // Polls at t=0, 5, 10: all OFFLINE
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(events.try_recv().is_err());

        prober.primary_up.store(true, Ordering::SeqCst);
        // Polls at t=15, 20, 25: one change
        tokio::time::sleep(Duration::from_secs(15)).await;

        let t = events.try_recv().unwrap();
        assert_eq!(t.to, ConnectivityState::Online);
        assert!(events.try_recv().is_err());
        assert!(state_rx.has_changed().unwrap());
        assert_eq!(*state_rx.borrow_and_update(), ConnectivityState::Online);

        monitor.stop().await;
        assert!(!monitor.is_running());
        assert_eq!(monitor.state(), ConnectivityState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_hanging_probe() {
        let prober = Arc::new(SwitchProber::default());
        prober.hang.store(true, Ordering::SeqCst);
        prober.primary_up.store(true, Ordering::SeqCst);
        let mut monitor = monitor(prober.clone());
        let _events = monitor.start().unwrap();

        // Let the first poll enter the probe
        while prober.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        monitor.stop().await;
        assert!(!monitor.is_running());
        assert_eq!(monitor.state(), ConnectivityState::Offline);

        // The monitor is restartable after a stop
        prober.hang.store(false, Ordering::SeqCst);
        let mut events = monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(events.try_recv().unwrap().to, ConnectivityState::Online);
        monitor.stop().await;
    }

    #[test]
    fn test_config_from_settings() {
        let config = MonitorConfig::default();
        assert_eq!(config.primary_target, "8.8.8.8:53");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
    }
}
