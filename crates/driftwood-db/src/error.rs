//! # Database Error Types
//!
//! Error types for local store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::Store (driftwood-sync) ← Fatal for push and local verbs    │
//! │       │                     └── absorbed and logged by pull            │
//! │       ▼                                                                 │
//! │  Application                                                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use driftwood_core::CoreError;
use thiserror::Error;

/// Local store failures. The sync layer treats every one of them as fatal
/// except inside a pull, which logs and reports false.
#[derive(Debug, Error)]
pub enum DbError {
    /// A queue entry that was already removed, or a row sqlx expected.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Adding an item whose id already exists locally
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Check or NOT NULL constraint violation.
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// The database file or its directory could not be opened or created.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An embedded migration did not apply, or an applied one was edited.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored snapshot could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Domain error bubbled up from driftwood-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No connection freed up within the acquire timeout. With the pinned
    /// in-memory pool this means a caller held a transaction across a call.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true for the "row does not exist" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }
}

/// ```text
/// RowNotFound    → NotFound
/// Database       → UniqueViolation | ConstraintViolation | QueryFailed
/// PoolTimedOut   → PoolExhausted
/// PoolClosed     → ConnectionFailed
/// other          → Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // "UNIQUE constraint failed: items.id", "CHECK constraint failed: ..."
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("constraint failed") {
                    DbError::ConstraintViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_build_expected_variants() {
        let missing = DbError::not_found("Item", "abc");
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "Item not found: abc");

        let dup = DbError::duplicate("items.id", "abc");
        assert!(!dup.is_not_found());
        assert_eq!(dup.to_string(), "Duplicate items.id: 'abc' already exists");
    }

    #[test]
    fn test_sqlx_mapping() {
        assert!(DbError::from(sqlx::Error::RowNotFound).is_not_found());
        assert!(matches!(
            DbError::from(sqlx::Error::PoolTimedOut),
            DbError::PoolExhausted
        ));
        assert!(matches!(
            DbError::from(sqlx::Error::PoolClosed),
            DbError::ConnectionFailed(_)
        ));
    }

    #[test]
    fn test_bad_snapshot_is_a_serialization_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(DbError::from(err), DbError::Serialization(_)));
    }
}
