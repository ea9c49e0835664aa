//! # Pull Coordinator
//!
//! Checkpointed incremental pull of remote records into the local store.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  load checkpoint(query)                                                │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────────────────────┐                                      │
//! │  │ query page (skip, top)       │◄──── skip += top ────┐               │
//! │  └──────────────┬───────────────┘                      │               │
//! │                 │ full page ───────────────────────────┘               │
//! │                 │ short page                                            │
//! │                 ▼                                                       │
//! │  nothing new? ──yes──► done, store untouched                           │
//! │                 │ no                                                    │
//! │                 ▼                                                       │
//! │  apply_pull(records, newest token)   ONE transaction                   │
//! │    · items with queued changes are skipped                             │
//! │    · identical rows and an unchanged token write nothing               │
//! │                                                                         │
//! │  Any failure → false; store and checkpoint unchanged.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use driftwood_core::{validate_page_size, validate_query_name, ItemFilter, RemoteRecord};
use driftwood_db::PullApplied;

use crate::error::{RemoteError, SyncError};
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::remote::{with_deadline, QueryRequest, RemoteClient};
use crate::store::LocalStore;

/// Why a pull did not complete.
#[derive(Debug)]
enum PullFailure {
    Remote(RemoteError),
    Local(SyncError),
}

impl From<RemoteError> for PullFailure {
    fn from(err: RemoteError) -> Self {
        PullFailure::Remote(err)
    }
}

impl From<SyncError> for PullFailure {
    fn from(err: SyncError) -> Self {
        PullFailure::Local(err)
    }
}

/// What a completed pull did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOutcome {
    /// Records fetched from the remote.
    pub fetched: usize,
    /// Local changes, `None` when nothing new arrived.
    pub applied: Option<PullApplied>,
    /// Checkpoint after the pull.
    pub checkpoint: Option<String>,
}

/// Fetches changed records page by page and applies them atomically.
#[derive(Clone)]
pub struct PullCoordinator {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    table: String,
    page_size: u32,
    request_timeout: Duration,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl PullCoordinator {
    /// Creates a coordinator for one remote table.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        table: impl Into<String>,
        page_size: u32,
        request_timeout: Duration,
    ) -> Self {
        PullCoordinator {
            store,
            remote,
            table: table.into(),
            page_size,
            request_timeout,
            emitter: Arc::new(NoOpEmitter),
        }
    }

    /// Reports absorbed failures to `emitter`.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Pulls every record of the named query changed since its checkpoint.
    ///
    /// Returns false on any failure; it never raises.
    pub async fn pull(&self, query_name: &str) -> bool {
        self.pull_with_filter(query_name, &ItemFilter::all()).await
    }

    /// Like [`pull`](Self::pull) with a record predicate sent to the remote.
    pub async fn pull_with_filter(&self, query_name: &str, filter: &ItemFilter) -> bool {
        self.pull_detailed(query_name, filter).await.is_some()
    }

    /// Runs a pull and returns what it did, or `None` if it failed.
    pub async fn pull_detailed(&self, query_name: &str, filter: &ItemFilter) -> Option<PullOutcome> {
        match self.try_pull(query_name, filter).await {
            Ok(outcome) => Some(outcome),
            Err(PullFailure::Remote(err)) => {
                warn!(query = %query_name, error = %err, "Pull failed, keeping local data");
                self.emitter.emit_error(&err.to_string(), err.is_transient());
                None
            }
            Err(PullFailure::Local(err)) => {
                error!(query = %query_name, error = %err, "Pull could not be applied locally");
                self.emitter.emit_error(&err.to_string(), false);
                None
            }
        }
    }

    async fn try_pull(
        &self,
        query_name: &str,
        filter: &ItemFilter,
    ) -> Result<PullOutcome, PullFailure> {
        validate_query_name(query_name).map_err(SyncError::from)?;
        validate_page_size(self.page_size).map_err(SyncError::from)?;

        let previous = self
            .store
            .load_checkpoint(query_name)
            .await?
            .map(|checkpoint| checkpoint.token);

        let (records, newest) = self.fetch_all(query_name, filter, previous.clone()).await?;
        let fetched = records.len();

        let token = match newest {
            Some(token) if fetched > 0 || previous.as_ref() != Some(&token) => token,
            _ => {
                debug!(query = %query_name, "No remote changes");
                return Ok(PullOutcome {
                    fetched,
                    applied: None,
                    checkpoint: previous,
                });
            }
        };

        let applied = self.store.apply_pull(query_name, &records, &token).await?;

        if applied.changed_anything() || previous.as_ref() != Some(&token) {
            info!(
                query = %query_name,
                fetched,
                upserted = applied.upserted,
                deleted = applied.deleted,
                skipped = applied.skipped,
                "Pull completed"
            );
        } else {
            debug!(query = %query_name, fetched, "Pull re-fetched known records only");
        }

        Ok(PullOutcome {
            fetched,
            applied: Some(applied),
            checkpoint: Some(token),
        })
    }

    /// Fetches every page. Returns the records and the newest token seen.
    async fn fetch_all(
        &self,
        query_name: &str,
        filter: &ItemFilter,
        checkpoint: Option<String>,
    ) -> Result<(Vec<RemoteRecord>, Option<String>), PullFailure> {
        let mut records = Vec::new();
        let mut newest = None;
        let mut request = QueryRequest {
            table: self.table.clone(),
            query_name: query_name.to_string(),
            filter: filter.clone(),
            checkpoint,
            skip: 0,
            top: self.page_size,
        };

        loop {
            let page = with_deadline(self.request_timeout, self.remote.query(&request)).await?;
            let count = page.records.len();

            if count > 0 && page.checkpoint.is_none() {
                return Err(RemoteError::Malformed(format!(
                    "page of {count} records carried no checkpoint"
                ))
                .into());
            }
            if page.checkpoint.is_some() {
                newest = page.checkpoint;
            }

            debug!(query = %query_name, skip = request.skip, count, "Fetched page");
            records.extend(page.records);

            if count < self.page_size as usize {
                break;
            }
            request.skip += self.page_size;
        }

        Ok((records, newest))
    }
}

impl std::fmt::Debug for PullCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullCoordinator")
            .field("table", &self.table)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
