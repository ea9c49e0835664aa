//! # driftwood-core: Pure Types for Driftwood
//!
//! This crate holds the data model of the offline-first sync layer. It has
//! zero I/O dependencies and is shared by the local store and the engine.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Driftwood Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application code                             │   │
//! │  │    get_items, get_item, add_item, update_item, delete_item      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                driftwood-sync (SyncEngine)                      │   │
//! │  │     SyncContext (push) · PullCoordinator · RemoteClient         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ driftwood-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │ conflict  │  │ validation│                  │   │
//! │  │   │   Item    │  │  policy   │  │   rules   │                  │   │
//! │  │   │  PendingOp│  │  reports  │  │   checks  │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  driftwood-db (Local Store)                     │   │
//! │  │         items · pending_operations · sync_checkpoints           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Item, pending operations, checkpoints, filters
//! - [`conflict`] - Push conflict resolution policy
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use driftwood_core::{Item, ItemFilter};
//!
//! let mut item = Item::new("Buy milk", "2 litres");
//! item.ensure_id();
//!
//! assert!(ItemFilter::by_id(item.id.clone()).matches(&item));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{ConflictRecord, ConflictResolution, ResolutionReport};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;
pub use validation::{
    validate_item, validate_item_id, validate_page_size, validate_query_name,
    validate_table_name, ValidationResult,
};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Name of the synchronized table.
pub const DEFAULT_TABLE_NAME: &str = "item";

/// Name of the incremental query covering the whole table.
///
/// Checkpoints are stored per query name, so two queries over the same table
/// keep independent pull positions.
pub const DEFAULT_QUERY_NAME: &str = "allItem";
