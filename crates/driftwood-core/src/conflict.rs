//! # Conflict Policy
//!
//! Pure resolution rules for push operations the remote rejected as conflicts.
//!
//! ## Decision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Conflict Resolution Policy                           │
//! │                                                                         │
//! │  operation kind │ server copy returned? │ resolution                   │
//! │  ───────────────┼───────────────────────┼───────────────────────────── │
//! │  update         │ yes                   │ RevertedToServer (server wins)│
//! │  update         │ no                    │ Discarded                    │
//! │  insert         │ any                   │ Discarded                    │
//! │  delete         │ any                   │ Discarded                    │
//! │                                                                         │
//! │  In every case the pending operation is removed. A conflict is never   │
//! │  retried automatically and never escalated as a fatal error.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{Item, OperationKind, PendingOperation};

/// A pending operation the remote rejected as a conflict.
///
/// Exists only while the push loop resolves it.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    /// The rejected operation.
    pub operation: PendingOperation,
    /// The local item the operation tried to push.
    pub local_item: Item,
    /// The server's current copy, when the remote returned one.
    pub server_item: Option<Item>,
}

impl ConflictRecord {
    /// Decides how this conflict is resolved.
    pub fn resolution(&self) -> ConflictResolution {
        match (self.operation.kind, &self.server_item) {
            (OperationKind::Update, Some(_)) => ConflictResolution::RevertedToServer,
            _ => ConflictResolution::Discarded,
        }
    }

    /// Builds the observability report for a resolution.
    pub fn report(&self, resolution: ConflictResolution) -> ResolutionReport {
        ResolutionReport {
            item_id: self.operation.item_id.clone(),
            table_name: self.operation.table_name.clone(),
            kind: self.operation.kind,
            resolution,
        }
    }
}

/// Outcome applied to a conflicting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The local record was overwritten with the server copy.
    RevertedToServer,
    /// The local change was abandoned; the local record was left as is.
    Discarded,
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictResolution::RevertedToServer => write!(f, "reverted"),
            ConflictResolution::Discarded => write!(f, "discarded"),
        }
    }
}

/// What happened to one conflicting operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Affected item id.
    pub item_id: String,
    /// Affected table.
    pub table_name: String,
    /// Kind of the rejected operation.
    pub kind: OperationKind,
    /// Applied resolution.
    pub resolution: ConflictResolution,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationStatus;
    use chrono::Utc;

    fn conflict(kind: OperationKind, server: Option<Item>) -> ConflictRecord {
        let local = Item::new("local", "").with_id("x");
        ConflictRecord {
            operation: PendingOperation {
                sequence: 1,
                id: "op-1".into(),
                kind,
                table_name: "item".into(),
                item_id: "x".into(),
                payload: serde_json::to_string(&local).unwrap(),
                status: OperationStatus::NeedsResolution,
                attempts: 0,
                last_error: None,
                created_at: Utc::now(),
                attempted_at: None,
            },
            local_item: local,
            server_item: server,
        }
    }

    #[test]
    fn test_update_with_server_copy_reverts() {
        let server = Item::new("server", "").with_id("x");
        let record = conflict(OperationKind::Update, Some(server));
        assert_eq!(record.resolution(), ConflictResolution::RevertedToServer);
    }

    #[test]
    fn test_everything_else_discards() {
        let server = Item::new("server", "").with_id("x");

        assert_eq!(
            conflict(OperationKind::Update, None).resolution(),
            ConflictResolution::Discarded
        );
        assert_eq!(
            conflict(OperationKind::Insert, Some(server.clone())).resolution(),
            ConflictResolution::Discarded
        );
        assert_eq!(
            conflict(OperationKind::Delete, Some(server)).resolution(),
            ConflictResolution::Discarded
        );
        assert_eq!(
            conflict(OperationKind::Delete, None).resolution(),
            ConflictResolution::Discarded
        );
    }

    #[test]
    fn test_report_carries_identity() {
        let record = conflict(OperationKind::Delete, None);
        let report = record.report(record.resolution());
        assert_eq!(report.item_id, "x");
        assert_eq!(report.table_name, "item");
        assert_eq!(report.kind, OperationKind::Delete);
        assert_eq!(report.resolution.to_string(), "discarded");
    }
}
