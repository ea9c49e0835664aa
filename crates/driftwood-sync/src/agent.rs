//! # Sync Agent
//!
//! Background task that keeps the engine in sync without a caller asking.
//!
//! ## Agent Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncAgent task                                 │
//! │                                                                         │
//! │   ┌──────────────────────────── select! ─────────────────────────────┐ │
//! │   │  sleep(delay)           trigger_rx.recv()     shutdown_rx.recv() │ │
//! │   └──────┬─────────────────────────┬──────────────────────┬──────────┘ │
//! │          └────────────┬────────────┘                      │            │
//! │                       ▼                                   ▼            │
//! │               engine.sync()                             stop           │
//! │                       │                                                 │
//! │         ┌─────────────┴─────────────┐                                   │
//! │         ▼                           ▼                                   │
//! │      success                     failure                                │
//! │   backoff.reset()          delay = backoff.next_backoff()               │
//! │   delay = poll_interval    (initial_backoff_ms … max_backoff_secs)      │
//! │                                                                         │
//! │   mode = offline → the agent never starts                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

use crate::config::{SyncConfig, SyncSettings};
use crate::engine::SyncEngine;

// =============================================================================
// Agent Status
// =============================================================================

/// What the background loop has been doing.
#[derive(Debug, Clone, Default)]
pub struct AgentStatus {
    /// Whether the loop is running.
    pub running: bool,
    /// Round-trips attempted.
    pub runs: u64,
    /// Failed round-trips since the last success.
    pub consecutive_failures: u32,
    /// Outcome of the last round-trip.
    pub last_ok: Option<bool>,
    /// When the last round-trip finished.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Wait before the next scheduled round-trip.
    pub next_delay: Option<Duration>,
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Periodic round-trip driver for a [`SyncEngine`].
pub struct SyncAgent {
    engine: Arc<SyncEngine>,
    settings: SyncSettings,
}

impl SyncAgent {
    /// Creates an agent. Nothing runs until [`start`](Self::start).
    pub fn new(engine: Arc<SyncEngine>, config: &SyncConfig) -> Self {
        SyncAgent {
            engine,
            settings: config.sync.clone(),
        }
    }

    /// Spawns the background loop.
    ///
    /// Returns `None` when sync is disabled (`mode = offline`).
    pub fn start(self) -> Option<SyncAgentHandle> {
        if !self.settings.mode.is_sync_enabled() {
            info!("Background sync is disabled (mode: offline)");
            return None;
        }

        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let status = Arc::new(RwLock::new(AgentStatus {
            running: true,
            ..Default::default()
        }));

        info!(
            poll_interval_secs = self.settings.poll_interval_secs,
            "Starting background sync"
        );

        tokio::spawn(Self::run(
            self.engine,
            self.settings,
            status.clone(),
            trigger_rx,
            shutdown_rx,
        ));

        Some(SyncAgentHandle {
            trigger_tx,
            shutdown_tx,
            status,
        })
    }

    fn backoff(settings: &SyncSettings) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(settings.initial_backoff_ms))
            .with_max_interval(Duration::from_secs(settings.max_backoff_secs))
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Main loop. The first round-trip runs immediately.
    async fn run(
        engine: Arc<SyncEngine>,
        settings: SyncSettings,
        status: Arc<RwLock<AgentStatus>>,
        mut trigger_rx: mpsc::Receiver<()>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let poll_interval = Duration::from_secs(settings.poll_interval_secs);
        let max_backoff = Duration::from_secs(settings.max_backoff_secs);
        let mut backoff = Self::backoff(&settings);
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Some(()) = trigger_rx.recv() => {
                    debug!("Sync triggered");
                }
                _ = shutdown_rx.recv() => {
                    info!("Background sync stopping");
                    break;
                }
            }

            let ok = match engine.sync().await {
                Ok(ok) => ok,
                Err(e) => {
                    error!(error = %e, "Background sync failed");
                    false
                }
            };

            delay = if ok {
                backoff.reset();
                poll_interval
            } else {
                backoff.next_backoff().unwrap_or(max_backoff)
            };

            let mut s = status.write().await;
            s.runs += 1;
            s.last_ok = Some(ok);
            s.last_run_at = Some(Utc::now());
            s.next_delay = Some(delay);
            if ok {
                s.consecutive_failures = 0;
            } else {
                s.consecutive_failures += 1;
                debug!(
                    failures = s.consecutive_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Round-trip failed, backing off"
                );
            }
        }

        status.write().await.running = false;
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Controls a running [`SyncAgent`]. Dropping every handle stops the agent.
#[derive(Debug, Clone)]
pub struct SyncAgentHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<AgentStatus>>,
}

impl SyncAgentHandle {
    /// Requests an immediate round-trip. Requests made while one is already
    /// pending are merged.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Gets the current agent status.
    pub async fn status(&self) -> AgentStatus {
        self.status.read().await.clone()
    }

    /// Signals the agent to stop after its current round-trip.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
