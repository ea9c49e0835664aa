//! # Sync Error Types
//!
//! Two error types with two very different fates.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  RemoteError (absorbed)             SyncError (fatal)                  │
//! │  ──────────────────────             ─────────────────                  │
//! │  ┌─────────────────┐                ┌─────────────────────────┐        │
//! │  │   Conflict      │ → policy       │  Store     (DbError)    │        │
//! │  │   server_item?  │   (revert /    │  Core      (CoreError)  │        │
//! │  └─────────────────┘    discard)    │  InvalidConfig          │        │
//! │  ┌─────────────────┐                │  InvalidUrl             │        │
//! │  │   Unavailable   │ → transient    │  ConfigLoad/SaveFailed  │        │
//! │  │   Timeout       │   abort push   │  ShuttingDown           │        │
//! │  └─────────────────┘                └─────────────────────────┘        │
//! │  ┌─────────────────┐                                                   │
//! │  │   Rejected      │ → unexpected                                      │
//! │  │   Malformed     │   abort push                                      │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! │  Remote errors never leave a verb. Sync errors always do.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use driftwood_core::{CoreError, Item, ValidationError};
use driftwood_db::DbError;
use thiserror::Error;

/// Result type alias for fatal sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Remote Error
// =============================================================================

/// Failure of one call to the remote service.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The remote rejected the write because its copy diverged.
    ///
    /// ## When This Occurs
    /// - Update or delete carried a stale version (`412`)
    /// - Insert of an id the remote already has (`409`)
    /// - Update or delete of an id the remote no longer has (`404`)
    #[error("Conflict on remote record")]
    Conflict {
        /// The server's current copy, when the remote returned one.
        server_item: Option<Item>,
    },

    /// The remote could not be reached or is temporarily unable to serve.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    /// The remote refused the call for a reason other than a conflict.
    #[error("Remote rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The remote answered with something that could not be understood.
    #[error("Malformed remote response: {0}")]
    Malformed(String),

    /// The client was used before `bind()`, or binding failed.
    #[error("Remote client not bound: {0}")]
    NotBound(String),
}

impl RemoteError {
    /// Returns true for conflicts, which are resolved by policy.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. })
    }

    /// Returns true for connectivity problems that may go away on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Unavailable(format!("timeout: {err}"))
        } else if err.is_connect() || err.is_request() {
            RemoteError::Unavailable(err.to_string())
        } else if err.is_decode() {
            RemoteError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RemoteError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Malformed(err.to_string())
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Fatal sync error: the only class that surfaces out of an engine verb.
///
/// ## Design Principles
/// - Connectivity never produces a `SyncError`
/// - Local durability, validation and configuration failures always do
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// The local store failed.
    #[error("Local store error: {0}")]
    Store(#[from] DbError),

    /// A record or queue entry is malformed.
    #[error("Invalid record: {0}")]
    Core(#[from] CoreError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Binding the remote client failed during initialization.
    #[error("Failed to bind remote client: {0}")]
    BindFailed(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the local store reported the row as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Store(db) if db.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classes() {
        assert!(RemoteError::Conflict { server_item: None }.is_conflict());
        assert!(RemoteError::Unavailable("refused".into()).is_transient());
        assert!(RemoteError::Timeout(30).is_transient());

        let rejected = RemoteError::Rejected {
            status: 400,
            message: "bad".into(),
        };
        assert!(!rejected.is_transient());
        assert!(!rejected.is_conflict());
        assert!(!RemoteError::Malformed("eof".into()).is_transient());
    }

    #[test]
    fn test_sync_error_categories() {
        assert!(SyncError::InvalidConfig("x".into()).is_config_error());
        assert!(SyncError::Store(DbError::not_found("Item", "a")).is_not_found());
        assert!(!SyncError::ShuttingDown.is_not_found());

        let validation: SyncError = ValidationError::Required {
            field: "id".into(),
        }
        .into();
        assert!(matches!(validation, SyncError::Core(CoreError::Validation(_))));
    }
}
