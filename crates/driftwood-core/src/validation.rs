//! # Validation Module
//!
//! Input validation for items and sync identifiers.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: SyncEngine verb (Rust)                                       │
//! │  └── THIS MODULE: malformed records are programming errors and         │
//! │      surface as fatal errors before anything is queued                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── PRIMARY KEY on items.id                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use driftwood_core::validation::{validate_item_id, validate_query_name};
//!
//! validate_item_id("3f6c0f2e-4b1a-4c5e-9b7a-0d2c1e8f9a10").unwrap();
//! assert!(validate_item_id("").is_err());
//! assert!(validate_query_name("allItem").is_ok());
//! ```

use crate::error::ValidationError;
use crate::types::Item;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of an item id.
pub const MAX_ID_LEN: usize = 255;

/// Maximum length of `Item::text`.
pub const MAX_TEXT_LEN: usize = 1_000;

/// Maximum length of `Item::description`.
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates an item id.
///
/// ## Rules
/// - Must not be empty
/// - At most 255 characters
/// - No `/`, `?` or `#` (ids are used as URL path segments)
pub fn validate_item_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "id".to_string(),
            max: MAX_ID_LEN,
        });
    }

    if id.contains(['/', '?', '#']) {
        return Err(ValidationError::InvalidFormat {
            field: "id".to_string(),
            reason: "must not contain '/', '?' or '#'".to_string(),
        });
    }

    Ok(())
}

/// Validates a table name: non-empty ASCII alphanumerics and underscores.
pub fn validate_table_name(name: &str) -> ValidationResult<()> {
    validate_identifier("table", name)
}

/// Validates a query name: non-empty ASCII alphanumerics and underscores.
pub fn validate_query_name(name: &str) -> ValidationResult<()> {
    validate_identifier("query_name", name)
}

fn validate_identifier(field: &str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "only ASCII letters, digits and '_' are allowed".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Item Validators
// =============================================================================

/// Validates an item before it is written locally.
///
/// The id must already be assigned.
pub fn validate_item(item: &Item) -> ValidationResult<()> {
    validate_item_id(&item.id)?;

    if item.text.chars().count() > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong {
            field: "text".to_string(),
            max: MAX_TEXT_LEN,
        });
    }

    if item.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: MAX_DESCRIPTION_LEN,
        });
    }

    Ok(())
}

/// Validates a page size for paged remote queries.
pub fn validate_page_size(size: u32) -> ValidationResult<()> {
    if size == 0 {
        return Err(ValidationError::MustBePositive {
            field: "pull_page_size".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_rules() {
        assert!(validate_item_id("abc-123").is_ok());
        assert!(validate_item_id("   ").is_err());
        assert!(validate_item_id(&"a".repeat(256)).is_err());
        assert!(validate_item_id("a/b").is_err());
        assert!(validate_item_id("a?b").is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_table_name("item").is_ok());
        assert!(validate_query_name("allItem").is_ok());
        assert!(validate_query_name("").is_err());
        assert!(validate_table_name("items; DROP").is_err());
    }

    #[test]
    fn test_item_rules() {
        let item = Item::new("ok", "fine").with_id("1");
        assert!(validate_item(&item).is_ok());

        let missing_id = Item::new("ok", "");
        assert!(matches!(
            validate_item(&missing_id),
            Err(ValidationError::Required { .. })
        ));

        let too_long = Item::new("x".repeat(MAX_TEXT_LEN + 1), "").with_id("1");
        assert!(matches!(
            validate_item(&too_long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_page_size() {
        assert!(validate_page_size(50).is_ok());
        assert!(validate_page_size(0).is_err());
    }
}
