//! # Error Types
//!
//! Domain-specific error types for driftwood-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  driftwood-core errors (this file)                                     │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  driftwood-db errors (separate crate)                                  │
//! │  └── DbError          - Local store failures                           │
//! │                                                                         │
//! │  driftwood-sync errors (separate crate)                                │
//! │  ├── RemoteError      - Absorbed by the sync round-trip                │
//! │  └── SyncError        - Fatal, surfaces out of engine verbs            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → caller      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A queued operation carries a snapshot that does not decode.
    ///
    /// ## When This Occurs
    /// - The payload column was edited by hand
    /// - A schema change altered the snapshot shape
    #[error("Pending operation {sequence} has an invalid payload: {reason}")]
    InvalidPayload { sequence: i64, reason: String },

    /// Unknown operation kind string.
    #[error("Unknown operation kind: {0}")]
    UnknownOperationKind(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidPayload {
            sequence: 3,
            reason: "EOF".into(),
        };
        assert_eq!(err.to_string(), "Pending operation 3 has an invalid payload: EOF");

        let err = ValidationError::Required {
            field: "id".to_string(),
        };
        assert_eq!(err.to_string(), "id is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::Required {
            field: "id".to_string(),
        }
        .into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
