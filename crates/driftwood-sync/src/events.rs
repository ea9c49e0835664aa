//! # Sync Events & Status
//!
//! What the engine reports about itself: a status snapshot for queries and
//! an emitter hook for push-style notifications.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncContext ──► emit_resolution   { item_id, table, reverted|discarded}│
//! │              ──► emit_progress     { pending, pushed }                  │
//! │              ──► emit_error        { message, retryable }               │
//! │  PullCoordinator ► emit_error                                          │
//! │  SyncEngine  ──► emit_status       SyncStatus after every round-trip   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use driftwood_core::{ConflictResolution, ResolutionReport};

// =============================================================================
// Sync Status
// =============================================================================

/// Cumulative counters since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Operations the remote accepted.
    pub pushed: u64,
    /// Conflicts resolved by taking the server copy.
    pub reverted: u64,
    /// Conflicts resolved by abandoning the local change.
    pub discarded: u64,
    /// Pulls that completed.
    pub pulls: u64,
    /// Records applied by those pulls.
    pub records_pulled: u64,
}

impl SyncStats {
    /// Counts a batch of conflict resolutions.
    pub fn record_resolutions(&mut self, reports: &[ResolutionReport]) {
        for report in reports {
            match report.resolution {
                ConflictResolution::RevertedToServer => self.reverted += 1,
                ConflictResolution::Discarded => self.discarded += 1,
            }
        }
    }
}

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether the engine finished initialization.
    pub initialized: bool,

    /// Operations waiting to be pushed.
    pub pending_count: u64,

    /// Outcome of the last push (`None` until one ran).
    pub last_push_ok: Option<bool>,

    /// When the last push finished.
    pub last_push_at: Option<DateTime<Utc>>,

    /// Outcome of the last pull (`None` until one ran).
    pub last_pull_ok: Option<bool>,

    /// When the last pull finished.
    pub last_pull_at: Option<DateTime<Utc>>,

    /// Last absorbed failure.
    pub last_error: Option<String>,

    /// Cumulative counters.
    pub stats: SyncStats,
}

// =============================================================================
// Event Emitter
// =============================================================================

/// Receiver of sync notifications (UI bindings, metrics, test probes).
pub trait SyncEventEmitter: Send + Sync {
    /// Status changed.
    fn emit_status(&self, status: &SyncStatus);

    /// A push made progress.
    fn emit_progress(&self, pending: u64, pushed: u64);

    /// A conflict was resolved.
    fn emit_resolution(&self, report: &ResolutionReport);

    /// A remote or local failure was absorbed.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// Emitter that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: u64, _pushed: u64) {}
    fn emit_resolution(&self, _report: &ResolutionReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}
