//! # Local Store
//!
//! The durable, queryable table the engine reads from and stages writes into.
//!
//! ## Capabilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         LocalStore                                      │
//! │                                                                         │
//! │  Schema        define_schema()                                         │
//! │                                                                         │
//! │  Items         insert / update / delete   (each also enqueues, atomic) │
//! │                query(filter) / get_all()                               │
//! │                                                                         │
//! │  Queue         pending_operations()  pending_count()                   │
//! │                complete_operation()  remove_operation()                │
//! │                mark_needs_resolution()  record_attempt_failure()       │
//! │                apply_server_copy()                                     │
//! │                                                                         │
//! │  Checkpoints   load_checkpoint()  apply_pull()  reset_checkpoint()     │
//! │                                                                         │
//! │  Every error is fatal: storage is assumed reliable.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use driftwood_core::{
    Item, ItemFilter, PendingOperation, RemoteRecord, SyncCheckpoint, DEFAULT_TABLE_NAME,
};
use driftwood_db::{Database, DbConfig, PullApplied};

use crate::error::SyncResult;

// =============================================================================
// LocalStore Trait
// =============================================================================

/// Durable table store with query-by-predicate and a pending operation log.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Creates the item table, the operation log and the checkpoint table.
    /// Idempotent.
    async fn define_schema(&self) -> SyncResult<()>;

    /// Stores a new item and enqueues its insert.
    async fn insert(&self, item: &Item) -> SyncResult<PendingOperation>;

    /// Overwrites an item and enqueues its update. The update is queued even
    /// when no local row exists; the remote then decides.
    async fn update(&self, item: &Item) -> SyncResult<PendingOperation>;

    /// Removes an item, if present, and enqueues its delete.
    async fn delete(&self, item: &Item) -> SyncResult<PendingOperation>;

    /// Items matching `filter`.
    async fn query(&self, filter: &ItemFilter) -> SyncResult<Vec<Item>>;

    /// Every item.
    async fn get_all(&self) -> SyncResult<Vec<Item>>;

    /// The operation log in enqueue order.
    async fn pending_operations(&self) -> SyncResult<Vec<PendingOperation>>;

    /// Length of the operation log.
    async fn pending_count(&self) -> SyncResult<u64>;

    /// Removes an operation the remote accepted, recording the server
    /// metadata of its copy when one was returned.
    async fn complete_operation(&self, sequence: i64, server_item: Option<&Item>)
        -> SyncResult<()>;

    /// Removes an operation without touching any item.
    async fn remove_operation(&self, sequence: i64) -> SyncResult<()>;

    /// Flags an operation as rejected by a conflict.
    async fn mark_needs_resolution(&self, sequence: i64, error: &str) -> SyncResult<()>;

    /// Records a failed attempt; the operation stays queued unchanged.
    async fn record_attempt_failure(&self, sequence: i64, error: &str) -> SyncResult<()>;

    /// Overwrites the local item with the server copy and removes the
    /// operation, atomically.
    async fn apply_server_copy(&self, sequence: i64, server_item: &Item) -> SyncResult<()>;

    /// Checkpoint of a named query.
    async fn load_checkpoint(&self, query_name: &str) -> SyncResult<Option<SyncCheckpoint>>;

    /// Applies pulled records and stores the new checkpoint, atomically.
    /// Records of items that still have queued operations are skipped.
    async fn apply_pull(
        &self,
        query_name: &str,
        records: &[RemoteRecord],
        token: &str,
    ) -> SyncResult<PullApplied>;

    /// Forgets a checkpoint. Returns true if one existed.
    async fn reset_checkpoint(&self, query_name: &str) -> SyncResult<bool>;
}

// =============================================================================
// SQLite Implementation
// =============================================================================

/// [`LocalStore`] over the driftwood-db SQLite database.
#[derive(Debug)]
pub struct SqliteLocalStore {
    db: Database,
    table_name: String,
    schema_definitions: AtomicUsize,
}

impl SqliteLocalStore {
    /// Wraps an open database. Queued operations target `table_name`.
    pub fn new(db: Database, table_name: impl Into<String>) -> Self {
        SqliteLocalStore {
            db,
            table_name: table_name.into(),
            schema_definitions: AtomicUsize::new(0),
        }
    }

    /// Opens (or creates) a database file.
    pub async fn open(path: impl AsRef<Path>, table_name: impl Into<String>) -> SyncResult<Self> {
        let db = Database::new(DbConfig::new(path.as_ref())).await?;
        Ok(Self::new(db, table_name))
    }

    /// Opens a private in-memory database for the default table.
    pub async fn in_memory() -> SyncResult<Self> {
        let db = Database::new(DbConfig::in_memory()).await?;
        Ok(Self::new(db, DEFAULT_TABLE_NAME))
    }

    /// The underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Table name queued operations target.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// How many times [`LocalStore::define_schema`] ran.
    pub fn schema_definitions(&self) -> usize {
        self.schema_definitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn define_schema(&self) -> SyncResult<()> {
        self.schema_definitions.fetch_add(1, Ordering::SeqCst);
        info!(table = %self.table_name, "Defining local schema");
        self.db.run_migrations().await?;
        Ok(())
    }

    async fn insert(&self, item: &Item) -> SyncResult<PendingOperation> {
        Ok(self.db.items().stage_insert(item, &self.table_name).await?)
    }

    async fn update(&self, item: &Item) -> SyncResult<PendingOperation> {
        Ok(self.db.items().stage_update(item, &self.table_name).await?)
    }

    async fn delete(&self, item: &Item) -> SyncResult<PendingOperation> {
        Ok(self.db.items().stage_delete(item, &self.table_name).await?)
    }

    async fn query(&self, filter: &ItemFilter) -> SyncResult<Vec<Item>> {
        Ok(self.db.items().query(filter).await?)
    }

    async fn get_all(&self) -> SyncResult<Vec<Item>> {
        Ok(self.db.items().list_all().await?)
    }

    async fn pending_operations(&self) -> SyncResult<Vec<PendingOperation>> {
        Ok(self.db.operations().list().await?)
    }

    async fn pending_count(&self) -> SyncResult<u64> {
        let count = self.db.operations().count().await?;
        Ok(count.max(0) as u64)
    }

    async fn complete_operation(
        &self,
        sequence: i64,
        server_item: Option<&Item>,
    ) -> SyncResult<()> {
        Ok(self.db.operations().complete(sequence, server_item).await?)
    }

    async fn remove_operation(&self, sequence: i64) -> SyncResult<()> {
        Ok(self.db.operations().remove(sequence).await?)
    }

    async fn mark_needs_resolution(&self, sequence: i64, error: &str) -> SyncResult<()> {
        Ok(self
            .db
            .operations()
            .mark_needs_resolution(sequence, error)
            .await?)
    }

    async fn record_attempt_failure(&self, sequence: i64, error: &str) -> SyncResult<()> {
        Ok(self.db.operations().record_failure(sequence, error).await?)
    }

    async fn apply_server_copy(&self, sequence: i64, server_item: &Item) -> SyncResult<()> {
        Ok(self
            .db
            .operations()
            .apply_server_copy(sequence, server_item)
            .await?)
    }

    async fn load_checkpoint(&self, query_name: &str) -> SyncResult<Option<SyncCheckpoint>> {
        Ok(self.db.checkpoints().get(query_name).await?)
    }

    async fn apply_pull(
        &self,
        query_name: &str,
        records: &[RemoteRecord],
        token: &str,
    ) -> SyncResult<PullApplied> {
        Ok(self
            .db
            .checkpoints()
            .apply_pull(query_name, records, token)
            .await?)
    }

    async fn reset_checkpoint(&self, query_name: &str) -> SyncResult<bool> {
        Ok(self.db.checkpoints().reset(query_name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwood_core::OperationKind;

    #[tokio::test]
    async fn test_define_schema_is_idempotent_and_counted() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        store.define_schema().await.unwrap();
        store.define_schema().await.unwrap();

        assert_eq!(store.schema_definitions(), 2);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_enqueue_for_configured_table() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = SqliteLocalStore::new(db, "todo");
        store.define_schema().await.unwrap();

        let item = Item::new("milk", "").with_id("m");
        store.insert(&item).await.unwrap();
        store
            .update(&Item::new("oat milk", "").with_id("m"))
            .await
            .unwrap();
        store.delete(&item).await.unwrap();

        let ops = store.pending_operations().await.unwrap();
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| op.table_name == "todo"));
        assert_eq!(ops[2].kind, OperationKind::Delete);
        assert_eq!(store.pending_count().await.unwrap(), 3);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_failures_surface_as_errors() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        store.define_schema().await.unwrap();

        let err = store.remove_operation(999).await.unwrap_err();
        assert!(err.is_not_found());

        store.insert(&Item::new("x", "").with_id("x")).await.unwrap();
        assert!(store.insert(&Item::new("x", "").with_id("x")).await.is_err());
    }
}
