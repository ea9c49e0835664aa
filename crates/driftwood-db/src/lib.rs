//! # driftwood-db: Local Store for Driftwood
//!
//! SQLite persistence for the offline-first sync layer, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Driftwood Data Flow                              │
//! │                                                                         │
//! │  SyncEngine verb (add_item)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   driftwood-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │    Repositories    │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ ItemRepository     │  │            │  │   │
//! │  │   │ SqlitePool    │◄───│ PendingOperation.. │  │ 001_init   │  │   │
//! │  │   │ WAL, FKs      │    │ CheckpointRepo     │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data_dir>/driftwood/syncstore.db                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Items, pending operations, checkpoints
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftwood_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("syncstore.db").run_migrations(true)).await?;
//!
//! let op = db.items().stage_insert(&item, "item").await?;
//! let queue = db.operations().list().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::SchemaStatus;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::checkpoint::{CheckpointRepository, PullApplied};
pub use repository::item::ItemRepository;
pub use repository::operation::PendingOperationRepository;
