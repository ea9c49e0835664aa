//! # driftwood-sync: Offline-First Sync Engine
//!
//! This crate keeps a local item table usable with or without connectivity
//! and reconciles it with an authoritative remote table service.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncEngine (verbs)                          │  │
//! │  │                                                                  │  │
//! │  │  get_items / get_item / add_item / update_item / delete_item     │  │
//! │  │  OnceCell init latch · engine-wide Mutex around every verb       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┴─────────────────────┐                  │
//! │         ▼                                           ▼                   │
//! │  ┌────────────────────────┐              ┌────────────────────────┐    │
//! │  │  SyncContext (push)    │              │  PullCoordinator       │    │
//! │  │                        │              │                        │    │
//! │  │ Replays the queue in   │              │ Paged incremental pull │    │
//! │  │ order, resolves        │              │ from the checkpoint,   │    │
//! │  │ conflicts (server wins │              │ applied atomically     │    │
//! │  │ or discard)            │              │                        │    │
//! │  └───────────┬────────────┘              └───────────┬────────────┘    │
//! │              │                                       │                  │
//! │      ┌───────┴───────────────────────────────────────┴───────┐          │
//! │      ▼                                                       ▼          │
//! │  ┌────────────────────────┐              ┌────────────────────────┐    │
//! │  │  LocalStore            │              │  RemoteClient          │    │
//! │  │  SqliteLocalStore      │              │  HttpRemoteClient      │    │
//! │  │  (driftwood-db)        │              │  MemoryRemote          │    │
//! │  └────────────────────────┘              └────────────────────────┘    │
//! │                                                                         │
//! │  SyncAgent: optional background loop calling SyncEngine::sync()        │
//! │  with exponential backoff while the remote is unreachable.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine`, the application-facing verbs
//! - [`context`] - Push loop and conflict resolution
//! - [`pull`] - Checkpointed incremental pull
//! - [`store`] - `LocalStore` trait and its SQLite implementation
//! - [`remote`] - `RemoteClient` trait
//! - [`http`] - REST implementation of `RemoteClient`
//! - [`memory`] - In-process authoritative remote
//! - [`agent`] - Background sync loop
//! - [`events`] - Status snapshot and event emitter
//! - [`config`] - Sync configuration (TOML + env)
//! - [`error`] - Remote and sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use driftwood_sync::{SyncAgent, SyncConfig, SyncEngine};
//! use driftwood_core::Item;
//!
//! let config = SyncConfig::load_or_default(None);
//! let engine = Arc::new(SyncEngine::open(&config).await?);
//!
//! // Works offline: the item is stored and queued locally.
//! let mut item = Item::new("buy milk", "");
//! engine.add_item(&mut item).await?;
//!
//! // Keep syncing in the background.
//! let agent = SyncAgent::new(engine.clone(), &config).start();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod memory;
pub mod pull;
pub mod remote;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentStatus, SyncAgent, SyncAgentHandle};
pub use config::{RemoteSettings, StoreSettings, SyncConfig, SyncMode, SyncSettings};
pub use context::{PushResult, PushStatus, SyncContext};
pub use engine::SyncEngine;
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use events::{NoOpEmitter, SyncEventEmitter, SyncStats, SyncStatus};
pub use http::HttpRemoteClient;
pub use memory::MemoryRemote;
pub use pull::{PullCoordinator, PullOutcome};
pub use remote::{QueryRequest, RemoteClient, RemotePage};
pub use store::{LocalStore, SqliteLocalStore};
