//! # Item Repository
//!
//! Local copy of the synchronized table, plus the staging writes that feed
//! the pending operation log.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL MUTATION (add_item / update_item / delete_item)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT / UPDATE / DELETE items WHERE id = ?                │   │
//! │  │                                                                 │   │
//! │  │  2. INSERT INTO pending_operations (kind, item_id, payload)    │   │
//! │  │     VALUES (?, ?, <item snapshot JSON>)                        │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A local write is never lost (it's in the local DB)                  │
//! │  • A queue entry is never orphaned (same transaction)                  │
//! │  • Offline? Entries queue up in enqueue order                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use driftwood_core::{Item, ItemFilter, OperationKind, OperationStatus, PendingOperation};

const ITEM_COLUMNS: &str = "id, text, description, done, version, updated_at";

/// Repository for the local item table.
#[derive(Debug, Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
}

impl ItemRepository {
    /// Creates a new ItemRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ItemRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an item by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// Lists every item in insertion order.
    pub async fn list_all(&self) -> DbResult<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY rowid");
        let items = sqlx::query_as::<_, Item>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Lists items matching a filter, in insertion order.
    ///
    /// Id and completion flag are evaluated in SQL; the text predicate is
    /// evaluated with [`ItemFilter::matches`] so its case folding is the same
    /// everywhere filters are applied.
    pub async fn query(&self, filter: &ItemFilter) -> DbResult<Vec<Item>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items WHERE 1 = 1"));

        if let Some(id) = &filter.id {
            qb.push(" AND id = ").push_bind(id.clone());
        }
        if let Some(done) = filter.done {
            qb.push(" AND done = ").push_bind(done);
        }
        qb.push(" ORDER BY rowid");

        let items = qb.build_query_as::<Item>().fetch_all(&self.pool).await?;

        Ok(items.into_iter().filter(|item| filter.matches(item)).collect())
    }

    /// Counts local items.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Staged writes (item + queue entry, one transaction)
    // =========================================================================

    /// Inserts a new item and queues an `insert` operation.
    ///
    /// ## Errors
    /// - `UniqueViolation` if an item with the same id already exists
    pub async fn stage_insert(&self, item: &Item, table_name: &str) -> DbResult<PendingOperation> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        );
        sqlx::query(&sql)
            .bind(&item.id)
            .bind(&item.text)
            .bind(&item.description)
            .bind(item.done)
            .bind(&item.version)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { .. } => DbError::duplicate("item id", item.id.as_str()),
                other => other,
            })?;

        let op = enqueue(&mut tx, OperationKind::Insert, table_name, item).await?;
        tx.commit().await?;

        debug!(item_id = %item.id, sequence = op.sequence, "Staged insert");
        Ok(op)
    }

    /// Overwrites the mutable fields of an item and queues an `update`
    /// operation.
    ///
    /// The server metadata (`version`, `updated_at`) of the stored row is kept
    /// and carried in the snapshot, so the remote update is conditional on the
    /// version this client last saw.
    ///
    /// When no local row exists (a pull already applied a remote delete) the
    /// operation is still queued with the caller's snapshot and the table is
    /// left alone. The remote then reports the conflict and the push discards
    /// the entry.
    pub async fn stage_update(&self, item: &Item, table_name: &str) -> DbResult<PendingOperation> {
        let mut tx = self.pool.begin().await?;

        let mut snapshot = item.clone();
        match fetch_item(&mut tx, &item.id).await? {
            Some(stored) => {
                sqlx::query("UPDATE items SET text = ?2, description = ?3, done = ?4 WHERE id = ?1")
                    .bind(&item.id)
                    .bind(&item.text)
                    .bind(&item.description)
                    .bind(item.done)
                    .execute(&mut *tx)
                    .await?;
                snapshot.adopt_server_metadata(&stored);
            }
            None => debug!(item_id = %item.id, "No local row, queueing update as is"),
        }

        let op = enqueue(&mut tx, OperationKind::Update, table_name, &snapshot).await?;
        tx.commit().await?;

        debug!(item_id = %item.id, sequence = op.sequence, "Staged update");
        Ok(op)
    }

    /// Removes an item and queues a `delete` operation carrying the removed
    /// row as its snapshot.
    ///
    /// A missing local row is not an error: the delete is queued with the
    /// caller's copy so the remote decides, as with [`stage_update`](Self::stage_update).
    pub async fn stage_delete(&self, item: &Item, table_name: &str) -> DbResult<PendingOperation> {
        let mut tx = self.pool.begin().await?;

        let snapshot = match fetch_item(&mut tx, &item.id).await? {
            Some(stored) => {
                remove_item(&mut tx, &item.id).await?;
                stored
            }
            None => {
                debug!(item_id = %item.id, "No local row, queueing delete as is");
                item.clone()
            }
        };

        let op = enqueue(&mut tx, OperationKind::Delete, table_name, &snapshot).await?;
        tx.commit().await?;

        debug!(item_id = %item.id, sequence = op.sequence, "Staged delete");
        Ok(op)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn fetch_item(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Item>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
    let item = sqlx::query_as::<_, Item>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(item)
}

/// Inserts or overwrites an item without queueing anything.
///
/// Used when the remote is authoritative: pulled records and server copies.
/// Returns false when the stored row already held exactly these values.
pub(crate) async fn upsert_item(conn: &mut SqliteConnection, item: &Item) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO items (id, text, description, done, version, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            text = excluded.text,
            description = excluded.description,
            done = excluded.done,
            version = excluded.version,
            updated_at = excluded.updated_at
        WHERE items.text IS NOT excluded.text
           OR items.description IS NOT excluded.description
           OR items.done IS NOT excluded.done
           OR items.version IS NOT excluded.version
           OR items.updated_at IS NOT excluded.updated_at
        "#,
    )
    .bind(&item.id)
    .bind(&item.text)
    .bind(&item.description)
    .bind(item.done)
    .bind(&item.version)
    .bind(item.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns true if the log holds an entry for this item.
pub(crate) async fn has_pending(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let pending: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pending_operations WHERE item_id = ?1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(pending)
}

/// Removes an item if present. Returns true if a row was deleted.
pub(crate) async fn remove_item(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM items WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Appends an entry to the pending operation log.
async fn enqueue(
    conn: &mut SqliteConnection,
    kind: OperationKind,
    table_name: &str,
    item: &Item,
) -> DbResult<PendingOperation> {
    let id = Uuid::new_v4().to_string();
    let payload = serde_json::to_string(item)?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO pending_operations (
            id, kind, table_name, item_id, payload, status, attempts, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
        "#,
    )
    .bind(&id)
    .bind(kind)
    .bind(table_name)
    .bind(&item.id)
    .bind(&payload)
    .bind(OperationStatus::Pending)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(PendingOperation {
        sequence: result.last_insert_rowid(),
        id,
        kind,
        table_name: table_name.to_string(),
        item_id: item.id.clone(),
        payload,
        status: OperationStatus::Pending,
        attempts: 0,
        last_error: None,
        created_at: now,
        attempted_at: None,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn setup_db() -> Database {
        Database::new(DbConfig::in_memory().run_migrations(true))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stage_insert_writes_item_and_queue_entry() {
        let db = setup_db().await;
        let item = Item::new("milk", "2 litres").with_id("m1");

        let op = db.items().stage_insert(&item, "item").await.unwrap();
        assert_eq!(op.kind, OperationKind::Insert);
        assert_eq!(op.item().unwrap(), item);

        assert_eq!(db.items().get_by_id("m1").await.unwrap(), Some(item));
        assert_eq!(db.operations().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rolls_back() {
        let db = setup_db().await;
        let item = Item::new("milk", "").with_id("m1");
        db.items().stage_insert(&item, "item").await.unwrap();

        let err = db.items().stage_insert(&item, "item").await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // No orphan queue entry from the failed transaction
        assert_eq!(db.operations().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stage_update_keeps_server_metadata() {
        let db = setup_db().await;
        let mut item = Item::new("milk", "").with_id("m1");
        item.version = Some("v1".into());
        db.items().stage_insert(&item, "item").await.unwrap();

        let edited = Item::new("oat milk", "").with_id("m1").with_done(true);
        let op = db.items().stage_update(&edited, "item").await.unwrap();

        let snapshot = op.item().unwrap();
        assert_eq!(snapshot.text, "oat milk");
        assert_eq!(snapshot.version.as_deref(), Some("v1"));

        let stored = db.items().get_by_id("m1").await.unwrap().unwrap();
        assert!(stored.done);
        assert_eq!(stored.version.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_update_and_delete_without_local_row_still_queue() {
        let db = setup_db().await;
        let mut ghost = Item::new("ghost", "").with_id("gone");
        ghost.version = Some("v3".into());

        let op = db.items().stage_update(&ghost, "item").await.unwrap();
        assert_eq!(op.kind, OperationKind::Update);
        assert_eq!(op.item().unwrap(), ghost);

        let op = db.items().stage_delete(&ghost, "item").await.unwrap();
        assert_eq!(op.kind, OperationKind::Delete);
        assert_eq!(op.item().unwrap().version.as_deref(), Some("v3"));

        // Nothing is resurrected locally
        assert!(db.items().get_by_id("gone").await.unwrap().is_none());
        assert_eq!(db.operations().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_reports_unchanged_rows() {
        let db = setup_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let item = Item::new("same", "").with_id("s");

        assert!(upsert_item(&mut conn, &item).await.unwrap());
        assert!(!upsert_item(&mut conn, &item).await.unwrap());
        assert!(upsert_item(&mut conn, &item.clone().with_done(true)).await.unwrap());
    }

    #[tokio::test]
    async fn test_stage_delete_snapshots_removed_row() {
        let db = setup_db().await;
        let item = Item::new("bread", "rye").with_id("b1");
        db.items().stage_insert(&item, "item").await.unwrap();

        let op = db.items().stage_delete(&item, "item").await.unwrap();
        assert_eq!(op.kind, OperationKind::Delete);
        assert_eq!(op.item().unwrap().description, "rye");
        assert!(db.items().get_by_id("b1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_by_filter() {
        let db = setup_db().await;
        let repo = db.items();
        repo.stage_insert(&Item::new("Buy milk", "").with_id("a"), "item")
            .await
            .unwrap();
        repo.stage_insert(&Item::new("Buy bread", "").with_id("b").with_done(true), "item")
            .await
            .unwrap();
        repo.stage_insert(&Item::new("Call mum", "").with_id("c"), "item")
            .await
            .unwrap();

        let by_id = repo.query(&ItemFilter::by_id("b")).await.unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, "b");

        let open_buys = repo
            .query(&ItemFilter::all().with_done(false).with_text("BUY"))
            .await
            .unwrap();
        assert_eq!(open_buys.len(), 1);
        assert_eq!(open_buys[0].id, "a");

        assert_eq!(repo.query(&ItemFilter::all()).await.unwrap().len(), 3);
        assert!(repo.query(&ItemFilter::by_id("zzz")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_all_keeps_insertion_order() {
        let db = setup_db().await;
        for id in ["z", "a", "m"] {
            db.items()
                .stage_insert(&Item::new(id, "").with_id(id), "item")
                .await
                .unwrap();
        }

        let ids: Vec<String> = db
            .items()
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
        assert_eq!(db.items().count().await.unwrap(), 3);
    }
}
