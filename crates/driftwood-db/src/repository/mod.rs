//! # Repository Module
//!
//! Repository implementations for the Driftwood local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  SqliteLocalStore (driftwood-sync)                                     │
//! │       │                                                                 │
//! │       │  db.items().stage_insert(&item, "item")                        │
//! │       ▼                                                                 │
//! │  ItemRepository              ← items + outbox staging                  │
//! │  PendingOperationRepository  ← pending_operations                      │
//! │  CheckpointRepository        ← sync_checkpoints + atomic pull apply    │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ItemRepository`](item::ItemRepository) - Item reads and staged writes
//! - [`PendingOperationRepository`](operation::PendingOperationRepository) - Change log
//! - [`CheckpointRepository`](checkpoint::CheckpointRepository) - Pull positions

pub mod checkpoint;
pub mod item;
pub mod operation;
