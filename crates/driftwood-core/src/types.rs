//! # Domain Types
//!
//! Core data types shared by the local store and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌─────────────────┐      │
//! │  │      Item       │   │ PendingOperation │   │ SyncCheckpoint  │      │
//! │  │  ─────────────  │   │  ──────────────  │   │  ─────────────  │      │
//! │  │  id (string)    │   │  sequence        │   │  query_name     │      │
//! │  │  text           │   │  kind            │   │  token (opaque) │      │
//! │  │  description    │   │  item snapshot   │   │  updated_at     │      │
//! │  │  done           │   │  status          │   └─────────────────┘      │
//! │  │  version        │   └──────────────────┘                            │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐                            │
//! │  │  RemoteRecord   │   │    ItemFilter    │                            │
//! │  │  item + deleted │   │  id / done / text│                            │
//! │  └─────────────────┘   └──────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! `Item::id` is assigned by the client (UUID v4) or by the server and never
//! changes afterwards. `version` and `updated_at` are owned by the remote
//! service and only ever copied from its responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Item
// =============================================================================

/// The synchronized record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Globally unique identifier. Empty until assigned.
    #[serde(default)]
    pub id: String,

    /// Short text of the item.
    #[serde(default)]
    pub text: String,

    /// Longer free-form description.
    #[serde(default)]
    pub description: String,

    /// Completion flag.
    #[serde(default)]
    pub done: bool,

    /// Optimistic concurrency token issued by the remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Last modification time on the remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Creates an item without an id. One is assigned when it is added.
    pub fn new(text: impl Into<String>, description: impl Into<String>) -> Self {
        Item {
            id: String::new(),
            text: text.into(),
            description: description.into(),
            done: false,
            version: None,
            updated_at: None,
        }
    }

    /// Sets the id explicitly.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the completion flag.
    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Returns true if an id has been assigned.
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Assigns a fresh UUID v4 if the item has no id yet.
    pub fn ensure_id(&mut self) -> &str {
        if !self.has_id() {
            self.id = Uuid::new_v4().to_string();
        }
        &self.id
    }

    /// Copies the server-owned metadata from a remote copy.
    pub fn adopt_server_metadata(&mut self, server: &Item) {
        self.version = server.version.clone();
        self.updated_at = server.updated_at;
    }
}

// =============================================================================
// Remote Record
// =============================================================================

/// A record as returned by a remote query.
///
/// Deleted records are still reported (tombstones) so incremental pulls can
/// propagate deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// The record content.
    #[serde(flatten)]
    pub item: Item,

    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteRecord {
    /// A live record.
    pub fn live(item: Item) -> Self {
        RemoteRecord {
            item,
            deleted: false,
        }
    }

    /// A tombstone.
    pub fn tombstone(item: Item) -> Self {
        RemoteRecord {
            item,
            deleted: true,
        }
    }
}

// =============================================================================
// Pending Operations
// =============================================================================

/// Kind of a queued local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// The item was created locally.
    Insert,
    /// The item was modified locally.
    Update,
    /// The item was removed locally.
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(CoreError::UnknownOperationKind(other.to_string())),
        }
    }
}

/// Lifecycle of a queued operation.
///
/// ```text
///  enqueue ──► Pending ──push ok──► (removed)
///                 │
///              conflict
///                 ▼
///          NeedsResolution ──revert / discard──► (removed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be pushed.
    #[default]
    Pending,
    /// Rejected by the remote as a conflict, awaiting its resolution.
    NeedsResolution,
}

/// An entry in the local change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PendingOperation {
    /// Enqueue order. Push replays ascending sequence.
    pub sequence: i64,
    /// Unique id of the queue entry (UUID v4).
    pub id: String,
    /// Mutation kind.
    pub kind: OperationKind,
    /// Table the mutation targets.
    pub table_name: String,
    /// Id of the affected item.
    pub item_id: String,
    /// JSON snapshot of the item at enqueue time.
    pub payload: String,
    /// Current status.
    pub status: OperationStatus,
    /// Number of failed push attempts.
    pub attempts: i64,
    /// Last failure message, if any.
    pub last_error: Option<String>,
    /// When the operation was enqueued.
    pub created_at: DateTime<Utc>,
    /// When a push was last attempted.
    pub attempted_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    /// Decodes the item snapshot.
    pub fn item(&self) -> CoreResult<Item> {
        serde_json::from_str(&self.payload).map_err(|e| CoreError::InvalidPayload {
            sequence: self.sequence,
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Checkpoint
// =============================================================================

/// Incremental pull marker for one named query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncCheckpoint {
    /// Query name, e.g. `allItem`.
    pub query_name: String,
    /// Opaque token understood only by the remote client that issued it.
    pub token: String,
    /// When the checkpoint was last advanced.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Item Filter
// =============================================================================

/// Predicate over items, used for local queries and remote query filters.
///
/// All set fields must match. An empty filter matches every item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    /// Exact id match.
    pub id: Option<String>,
    /// Exact completion flag match.
    pub done: Option<bool>,
    /// Case-insensitive substring of `text`.
    pub text_contains: Option<String>,
}

impl ItemFilter {
    /// Matches every item.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches the item with the given id.
    pub fn by_id(id: impl Into<String>) -> Self {
        ItemFilter {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Restricts to items with the given completion flag.
    pub fn with_done(mut self, done: bool) -> Self {
        self.done = Some(done);
        self
    }

    /// Restricts to items whose text contains `needle`.
    pub fn with_text(mut self, needle: impl Into<String>) -> Self {
        self.text_contains = Some(needle.into());
        self
    }

    /// Returns true if no restriction is set.
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.done.is_none() && self.text_contains.is_none()
    }

    /// Evaluates the filter against an item.
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(ref id) = self.id {
            if &item.id != id {
                return false;
            }
        }
        if let Some(done) = self.done {
            if item.done != done {
                return false;
            }
        }
        if let Some(ref needle) = self.text_contains {
            if !item.text.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
