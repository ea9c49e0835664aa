//! # Remote Client
//!
//! The seam between the engine and the authoritative remote service.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  bind()                      → once per process, before anything else  │
//! │  insert(table, item)         → Item (server copy)      | RemoteError   │
//! │  update(table, item)         → Item (server copy)      | RemoteError   │
//! │  delete(table, item)         → ()                      | RemoteError   │
//! │  query(QueryRequest)         → RemotePage              | RemoteError   │
//! │                                                                         │
//! │  RemoteError::Conflict       → the push loop resolves it by policy     │
//! │  RemoteError::Unavailable    → transient, push aborts, pull → false    │
//! │  RemoteError::Timeout          "                                        │
//! │  anything else               → unexpected, push aborts, pull → false   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Checkpoint tokens are opaque to everything but the client that issued
//! them: the engine only stores and hands them back.

use async_trait::async_trait;
use std::time::Duration;

use driftwood_core::{Item, ItemFilter, RemoteRecord};

use crate::error::{RemoteError, RemoteResult};

/// One page of an incremental query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    /// Remote table.
    pub table: String,
    /// Name of the incremental query.
    pub query_name: String,
    /// Record predicate.
    pub filter: ItemFilter,
    /// Token from the last successful pull, if any.
    pub checkpoint: Option<String>,
    /// Records to skip.
    pub skip: u32,
    /// Maximum records to return.
    pub top: u32,
}

/// Records returned for one [`QueryRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePage {
    /// Records in ascending change order. Includes tombstones.
    pub records: Vec<RemoteRecord>,
    /// Token covering every record up to the end of this page. `None` when
    /// the page is empty.
    pub checkpoint: Option<String>,
}

/// Client for the authoritative remote table service.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Binds the client to its configuration (URL, credentials, HTTP client).
    async fn bind(&self) -> RemoteResult<()>;

    /// Creates a record. Returns the server's copy with its metadata.
    async fn insert(&self, table: &str, item: &Item) -> RemoteResult<Item>;

    /// Replaces a record, conditional on `item.version` when set.
    async fn update(&self, table: &str, item: &Item) -> RemoteResult<Item>;

    /// Deletes a record, conditional on `item.version` when set.
    async fn delete(&self, table: &str, item: &Item) -> RemoteResult<()>;

    /// Fetches one page of records changed since the request's checkpoint.
    async fn query(&self, request: &QueryRequest) -> RemoteResult<RemotePage>;
}

/// Runs a remote call under a deadline. Expiry is a transient failure.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, call: F) -> RemoteResult<T>
where
    F: std::future::Future<Output = RemoteResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(deadline.as_secs())),
    }
}
