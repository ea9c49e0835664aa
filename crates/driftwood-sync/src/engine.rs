//! # Sync Engine
//!
//! The application-facing surface: item verbs that always answer from the
//! local store and reconcile with the remote on a best-effort basis.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   Uninitialized ──initialize()──► Initialized      (one-way)           │
//! │                    │                                                    │
//! │                    ├─ remote.bind()                 exactly once        │
//! │                    └─ store.define_schema()         exactly once        │
//! │                                                                         │
//! │   Concurrent first calls wait on the same OnceCell latch.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Verbs
//! ```text
//! ┌──────────────────┬──────────────────────────────────────┬────────────┐
//! │ Verb             │ Steps                                │ Returns    │
//! ├──────────────────┼──────────────────────────────────────┼────────────┤
//! │ get_items(force) │ [pull] → get_all                     │ local data │
//! │ get_item(id)     │ pull → query(id)                     │ Option     │
//! │ add_item         │ pull → insert → push → pull          │ true       │
//! │ update_item      │ update → push → pull                 │ true       │
//! │ delete_item      │ pull → delete → push → pull          │ true       │
//! │ sync             │ push → pull                          │ round-trip │
//! └──────────────────┴──────────────────────────────────────┴────────────┘
//! ```
//!
//! Every verb runs under one engine-wide lock, so the push and pull phases of
//! two calls never interleave. Write verbs report success once the change is
//! durably queued; connectivity never fails them.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OnceCell, RwLock};
use tracing::{debug, info, warn};

use driftwood_core::{validate_item, validate_item_id, Item, ItemFilter};

use crate::config::SyncConfig;
use crate::context::{PushResult, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, SyncEventEmitter, SyncStatus};
use crate::http::HttpRemoteClient;
use crate::pull::PullCoordinator;
use crate::remote::RemoteClient;
use crate::store::{LocalStore, SqliteLocalStore};

/// Offline-first item engine over a local store and a remote client.
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    context: SyncContext,
    puller: PullCoordinator,
    query_name: String,
    init: OnceCell<()>,
    lock: Mutex<()>,
    status: RwLock<SyncStatus>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncEngine {
    /// Creates an engine over explicit backends.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        Self::with_emitter(store, remote, config, Arc::new(NoOpEmitter))
    }

    /// Creates an engine that reports to `emitter`.
    pub fn with_emitter(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        config: &SyncConfig,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let context = SyncContext::with_emitter(
            store.clone(),
            remote.clone(),
            config.request_timeout(),
            emitter.clone(),
        );
        let puller = PullCoordinator::new(
            store.clone(),
            remote.clone(),
            config.remote.table.clone(),
            config.remote.pull_page_size,
            config.request_timeout(),
        )
        .with_emitter(emitter.clone());

        Ok(SyncEngine {
            store,
            remote,
            context,
            puller,
            query_name: config.remote.query_name.clone(),
            init: OnceCell::new(),
            lock: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
            emitter,
        })
    }

    /// Opens the SQLite store at the configured path and an HTTP client for
    /// the configured remote.
    pub async fn open(config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;

        let path = config.database_path().ok_or_else(|| {
            SyncError::InvalidConfig("no database path and no data directory".into())
        })?;
        let store = SqliteLocalStore::open(&path, config.remote.table.clone()).await?;
        let remote = HttpRemoteClient::from_config(config);

        info!(path = %path.display(), url = %config.remote.url, "Opening sync engine");
        Self::new(Arc::new(store), Arc::new(remote), config)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The local store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// The remote client.
    pub fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    /// Name of the incremental query the verbs pull.
    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Binds the remote client and defines the local schema, once.
    ///
    /// Idempotent and safe to call concurrently. A failed attempt leaves the
    /// engine uninitialized so the next call retries.
    pub async fn initialize(&self) -> SyncResult<()> {
        self.init
            .get_or_try_init(|| async {
                info!("Initializing sync engine");
                self.remote
                    .bind()
                    .await
                    .map_err(|e| SyncError::BindFailed(e.to_string()))?;
                self.store.define_schema().await?;

                let pending = self.store.pending_count().await?;
                let mut status = self.status.write().await;
                status.initialized = true;
                status.pending_count = pending;
                info!(pending, "Sync engine initialized");
                Ok::<_, SyncError>(())
            })
            .await?;
        Ok(())
    }

    /// Returns true once [`initialize`](Self::initialize) succeeded.
    pub fn is_initialized(&self) -> bool {
        self.init.initialized()
    }

    async fn begin(&self) -> SyncResult<MutexGuard<'_, ()>> {
        self.initialize().await?;
        Ok(self.lock.lock().await)
    }

    // =========================================================================
    // Read Verbs
    // =========================================================================

    /// All local items; pulls first when `force_refresh` is set.
    ///
    /// A failed pull still returns the local data.
    pub async fn get_items(&self, force_refresh: bool) -> SyncResult<Vec<Item>> {
        let _guard = self.begin().await?;
        if force_refresh {
            self.pull_locked().await?;
        }
        self.store.get_all().await
    }

    /// One item by id, after a pull attempt.
    ///
    /// Returns `None` when no local item has this id.
    pub async fn get_item(&self, id: &str) -> SyncResult<Option<Item>> {
        validate_item_id(id)?;
        let _guard = self.begin().await?;
        self.pull_locked().await?;

        let found = self.store.query(&ItemFilter::by_id(id)).await?;
        Ok(found.into_iter().next())
    }

    // =========================================================================
    // Write Verbs
    // =========================================================================

    /// Adds an item, assigning an id if it has none.
    ///
    /// Returns true once the item is stored and queued, whatever the
    /// round-trip's outcome.
    pub async fn add_item(&self, item: &mut Item) -> SyncResult<bool> {
        item.ensure_id();
        validate_item(item)?;

        let _guard = self.begin().await?;
        self.pull_locked().await?;
        self.store.insert(item).await?;
        debug!(item_id = %item.id, "Item added locally");

        self.round_trip_locked().await?;
        Ok(true)
    }

    /// Edits an item. The local edit wins provisionally; no pull runs first.
    pub async fn update_item(&self, item: &Item) -> SyncResult<bool> {
        validate_item(item)?;

        let _guard = self.begin().await?;
        self.store.update(item).await?;
        debug!(item_id = %item.id, "Item updated locally");

        self.round_trip_locked().await?;
        Ok(true)
    }

    /// Removes an item.
    pub async fn delete_item(&self, item: &Item) -> SyncResult<bool> {
        validate_item_id(&item.id)?;

        let _guard = self.begin().await?;
        self.pull_locked().await?;
        self.store.delete(item).await?;
        debug!(item_id = %item.id, "Item deleted locally");

        self.round_trip_locked().await?;
        Ok(true)
    }

    // =========================================================================
    // Sync Verbs
    // =========================================================================

    /// Push then pull. Returns true if both succeeded.
    pub async fn sync(&self) -> SyncResult<bool> {
        let _guard = self.begin().await?;
        self.round_trip_locked().await
    }

    /// Pushes the pending queue.
    pub async fn push(&self) -> SyncResult<PushResult> {
        let _guard = self.begin().await?;
        self.push_locked().await
    }

    /// Pulls the engine's query. Returns false if the pull failed.
    pub async fn pull(&self) -> SyncResult<bool> {
        let _guard = self.begin().await?;
        self.pull_locked().await
    }

    /// Number of queued operations.
    pub async fn pending_count(&self) -> SyncResult<u64> {
        self.initialize().await?;
        self.store.pending_count().await
    }

    /// Forgets the pull checkpoint so the next pull fetches everything.
    pub async fn reset_checkpoint(&self) -> SyncResult<bool> {
        let _guard = self.begin().await?;
        let existed = self.store.reset_checkpoint(&self.query_name).await?;
        info!(query = %self.query_name, existed, "Checkpoint reset");
        Ok(existed)
    }

    /// Status snapshot.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    // =========================================================================
    // Locked Phases
    // =========================================================================

    async fn round_trip_locked(&self) -> SyncResult<bool> {
        let pushed = self.push_locked().await?;
        if !pushed.is_success() {
            debug!("Skipping pull after failed push");
            return Ok(false);
        }
        self.pull_locked().await
    }

    async fn push_locked(&self) -> SyncResult<PushResult> {
        let result = self.context.push().await?;
        let pending = self.store.pending_count().await?;

        let snapshot = {
            let mut status = self.status.write().await;
            status.pending_count = pending;
            status.last_push_ok = Some(result.is_success());
            status.last_push_at = Some(Utc::now());
            status.stats.pushed += result.pushed as u64;
            status.stats.record_resolutions(&result.resolutions);
            if let Some(reason) = result.failure() {
                status.last_error = Some(reason.to_string());
            }
            status.clone()
        };
        self.emitter.emit_status(&snapshot);

        if let Some(reason) = result.failure() {
            warn!(pending, error = %reason, "Changes stay queued until the next sync");
        }
        Ok(result)
    }

    async fn pull_locked(&self) -> SyncResult<bool> {
        let outcome = self
            .puller
            .pull_detailed(&self.query_name, &ItemFilter::all())
            .await;

        let snapshot = {
            let mut status = self.status.write().await;
            status.last_pull_ok = Some(outcome.is_some());
            status.last_pull_at = Some(Utc::now());
            match outcome {
                Some(ref outcome) => {
                    status.stats.pulls += 1;
                    if let Some(applied) = outcome.applied {
                        status.stats.records_pulled += (applied.upserted + applied.deleted) as u64;
                    }
                }
                None => status.last_error = Some(format!("pull of {} failed", self.query_name)),
            }
            status.clone()
        };
        self.emitter.emit_status(&snapshot);

        Ok(outcome.is_some())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("query_name", &self.query_name)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;

    async fn setup() -> (Arc<SqliteLocalStore>, Arc<MemoryRemote>, SyncEngine) {
        let store = Arc::new(SqliteLocalStore::in_memory().await.unwrap());
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(store.clone(), remote.clone(), &SyncConfig::default()).unwrap();
        (store, remote, engine)
    }

    #[tokio::test]
    async fn test_verbs_initialize_lazily() {
        let (store, remote, engine) = setup().await;
        assert!(!engine.is_initialized());

        assert!(engine.get_items(false).await.unwrap().is_empty());
        assert!(engine.is_initialized());
        assert_eq!(remote.bind_count(), 1);
        assert_eq!(store.schema_definitions(), 1);

        engine.initialize().await.unwrap();
        assert_eq!(remote.bind_count(), 1);
        assert!(engine.status().await.initialized);
    }

    #[tokio::test]
    async fn test_add_item_assigns_id_and_syncs() {
        let (_, remote, engine) = setup().await;

        let mut item = Item::new("buy milk", "2 litres");
        assert!(engine.add_item(&mut item).await.unwrap());
        assert!(item.has_id());

        let server = remote.get("item", &item.id).unwrap();
        assert_eq!(server.text, "buy milk");
        assert_eq!(engine.pending_count().await.unwrap(), 0);

        let local = engine.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(local.version, server.version);
    }

    #[tokio::test]
    async fn test_write_verbs_succeed_offline() {
        let (_, remote, engine) = setup().await;
        remote.set_online(false);

        let mut item = Item::new("offline", "");
        assert!(engine.add_item(&mut item).await.unwrap());
        item.text = "still offline".into();
        assert!(engine.update_item(&item).await.unwrap());

        let items = engine.get_items(true).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "still offline");
        assert_eq!(engine.pending_count().await.unwrap(), 2);

        let status = engine.status().await;
        assert_eq!(status.last_push_ok, Some(false));
        assert_eq!(status.last_pull_ok, Some(false));
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_update_of_unknown_item_is_discarded_by_the_remote() {
        let (store, _, engine) = setup().await;
        let ghost = Item::new("ghost", "").with_id("nope");

        assert!(engine.update_item(&ghost).await.unwrap());
        assert_eq!(engine.pending_count().await.unwrap(), 0);
        assert!(store.get_all().await.unwrap().is_empty());
        assert_eq!(engine.status().await.stats.discarded, 1);
    }

    #[tokio::test]
    async fn test_invalid_item_is_rejected_before_storage() {
        let (store, _, engine) = setup().await;
        engine.initialize().await.unwrap();

        let mut item = Item::new("slashed", "").with_id("a/b");
        assert!(engine.add_item(&mut item).await.is_err());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_and_stats() {
        let (_, remote, engine) = setup().await;
        remote.server_upsert("item", Item::new("from elsewhere", "").with_id("e"));

        assert!(engine.sync().await.unwrap());
        let status = engine.status().await;
        assert_eq!(status.stats.pulls, 1);
        assert_eq!(status.stats.records_pulled, 1);

        assert!(engine.reset_checkpoint().await.unwrap());
        assert!(!engine.reset_checkpoint().await.unwrap());
    }
}
