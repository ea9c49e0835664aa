//! # Sync Context
//!
//! Drains the pending operation log against the remote, in enqueue order,
//! and resolves conflicts deterministically.
//!
//! ## Push Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  loop: oldest pending operation                                        │
//! │    │                                                                    │
//! │    ├── none left ─────────────────────────────► Completed              │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  remote.insert / update / delete (under deadline)                      │
//! │    │                                                                    │
//! │    ├── Ok(server copy) ──► complete_operation (forward metadata) ─┐    │
//! │    │                                                               │    │
//! │    ├── Conflict ─────────► mark_needs_resolution                  │    │
//! │    │                        update + server copy → revert         │    │
//! │    │                        anything else        → discard        │    │
//! │    │                        report ───────────────────────────────┤    │
//! │    │                                                      continue◄┘    │
//! │    │                                                                    │
//! │    └── Unavailable / Timeout / Rejected / Malformed                    │
//! │              record_attempt_failure (this operation only)              │
//! │              ─────────────────────────────────────────► Aborted        │
//! │                                                                         │
//! │  Local store errors return Err at any step.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each operation is re-read from the store right before it is pushed, so an
//! update queued after an insert carries the version the insert received.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use driftwood_core::{
    ConflictRecord, ConflictResolution, Item, OperationKind, PendingOperation, ResolutionReport,
};

use crate::error::{RemoteError, RemoteResult, SyncResult};
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::remote::{with_deadline, RemoteClient};
use crate::store::LocalStore;

// =============================================================================
// Push Result
// =============================================================================

/// How a push ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    /// The queue drained; conflicts, if any, were resolved.
    Completed,
    /// The push stopped at a failing operation. It and everything after it
    /// are still queued.
    Aborted {
        /// Failure description.
        reason: String,
        /// Whether the failure was a connectivity problem.
        transient: bool,
    },
}

/// Outcome of one [`SyncContext::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// How the push ended.
    pub status: PushStatus,
    /// Operations the remote accepted.
    pub pushed: usize,
    /// Conflicts resolved along the way, in queue order.
    pub resolutions: Vec<ResolutionReport>,
}

impl PushResult {
    /// Returns true if the queue fully drained.
    pub fn is_success(&self) -> bool {
        matches!(self.status, PushStatus::Completed)
    }

    /// Failure description, when the push aborted.
    pub fn failure(&self) -> Option<&str> {
        match self.status {
            PushStatus::Completed => None,
            PushStatus::Aborted { ref reason, .. } => Some(reason),
        }
    }
}

// =============================================================================
// Sync Context
// =============================================================================

/// Holds the bound store and remote handles and runs pushes against them.
#[derive(Clone)]
pub struct SyncContext {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    request_timeout: Duration,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncContext {
    /// Creates a context. Every remote call is bounded by `request_timeout`.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        request_timeout: Duration,
    ) -> Self {
        Self::with_emitter(store, remote, request_timeout, Arc::new(NoOpEmitter))
    }

    /// Creates a context that reports resolutions and failures to `emitter`.
    pub fn with_emitter(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        request_timeout: Duration,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SyncContext {
            store,
            remote,
            request_timeout,
            emitter,
        }
    }

    /// The local store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// The remote client.
    pub fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    /// Pushes every pending operation in enqueue order.
    ///
    /// ## Returns
    /// - `Ok(PushResult)` with `Completed` when the queue drained
    /// - `Ok(PushResult)` with `Aborted` at the first non-conflict remote failure
    /// - `Err(SyncError)` when the local store fails or a queued payload is unreadable
    pub async fn push(&self) -> SyncResult<PushResult> {
        let queued = self.store.pending_count().await?;
        if queued == 0 {
            debug!("Nothing to push");
            return Ok(PushResult {
                status: PushStatus::Completed,
                pushed: 0,
                resolutions: Vec::new(),
            });
        }

        info!(count = queued, "Pushing pending operations");

        let mut pushed = 0;
        let mut resolutions = Vec::new();

        while let Some(operation) = self.next_operation().await? {
            let item = operation.item()?;

            match self.send(&operation, &item).await {
                Ok(server_item) => {
                    self.store
                        .complete_operation(operation.sequence, server_item.as_ref())
                        .await?;
                    pushed += 1;
                    debug!(
                        sequence = operation.sequence,
                        item_id = %operation.item_id,
                        kind = %operation.kind,
                        "Operation pushed"
                    );
                    let pending = self.store.pending_count().await?;
                    self.emitter.emit_progress(pending, pushed as u64);
                }
                Err(RemoteError::Conflict { server_item }) => {
                    let conflict = ConflictRecord {
                        operation,
                        local_item: item,
                        server_item,
                    };
                    resolutions.push(self.resolve(conflict).await?);
                }
                Err(err) => {
                    let transient = err.is_transient();
                    let reason = err.to_string();
                    self.store
                        .record_attempt_failure(operation.sequence, &reason)
                        .await?;

                    warn!(
                        sequence = operation.sequence,
                        item_id = %operation.item_id,
                        kind = %operation.kind,
                        transient,
                        error = %reason,
                        pushed,
                        "Push aborted"
                    );
                    self.emitter.emit_error(&reason, transient);

                    return Ok(PushResult {
                        status: PushStatus::Aborted { reason, transient },
                        pushed,
                        resolutions,
                    });
                }
            }
        }

        info!(
            pushed,
            conflicts = resolutions.len(),
            "Push completed"
        );

        Ok(PushResult {
            status: PushStatus::Completed,
            pushed,
            resolutions,
        })
    }

    async fn next_operation(&self) -> SyncResult<Option<PendingOperation>> {
        Ok(self.store.pending_operations().await?.into_iter().next())
    }

    /// Sends one operation. Inserts and updates return the server copy.
    async fn send(&self, operation: &PendingOperation, item: &Item) -> RemoteResult<Option<Item>> {
        let table = operation.table_name.as_str();
        let deadline = self.request_timeout;

        match operation.kind {
            OperationKind::Insert => with_deadline(deadline, self.remote.insert(table, item))
                .await
                .map(Some),
            OperationKind::Update => with_deadline(deadline, self.remote.update(table, item))
                .await
                .map(Some),
            OperationKind::Delete => with_deadline(deadline, self.remote.delete(table, item))
                .await
                .map(|()| None),
        }
    }

    /// Applies the conflict policy to one rejected operation.
    async fn resolve(&self, conflict: ConflictRecord) -> SyncResult<ResolutionReport> {
        let sequence = conflict.operation.sequence;
        self.store
            .mark_needs_resolution(sequence, "conflict with remote copy")
            .await?;

        let resolution = conflict.resolution();
        match (resolution, conflict.server_item.as_ref()) {
            (ConflictResolution::RevertedToServer, Some(server_item)) => {
                self.store.apply_server_copy(sequence, server_item).await?
            }
            _ => self.store.remove_operation(sequence).await?,
        }

        let report = conflict.report(resolution);
        warn!(
            item_id = %report.item_id,
            table = %report.table_name,
            kind = %report.kind,
            resolution = %report.resolution,
            "Conflict resolved"
        );
        self.emitter.emit_resolution(&report);

        Ok(report)
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
