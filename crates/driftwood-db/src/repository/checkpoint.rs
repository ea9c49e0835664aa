//! # Checkpoint Repository
//!
//! Incremental pull positions, one per query name, and the atomic apply step
//! of a pull.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::item::{has_pending, remove_item, upsert_item};
use driftwood_core::{RemoteRecord, SyncCheckpoint};

/// Counts of what one applied pull changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullApplied {
    /// Records inserted or overwritten with different values.
    pub upserted: usize,
    /// Tombstones that removed a local record.
    pub deleted: usize,
    /// Records left alone because the item has queued local changes.
    pub skipped: usize,
}

impl PullApplied {
    /// Returns true if the pull changed any local row.
    pub fn changed_anything(&self) -> bool {
        self.upserted + self.deleted > 0
    }
}

/// Repository for sync checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointRepository {
    pool: SqlitePool,
}

impl CheckpointRepository {
    /// Creates a new CheckpointRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CheckpointRepository { pool }
    }

    /// Loads the checkpoint of a query, if one was ever saved.
    pub async fn get(&self, query_name: &str) -> DbResult<Option<SyncCheckpoint>> {
        let checkpoint = sqlx::query_as::<_, SyncCheckpoint>(
            "SELECT query_name, token, updated_at FROM sync_checkpoints WHERE query_name = ?1",
        )
        .bind(query_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(checkpoint)
    }

    /// Applies pulled records and advances the checkpoint in one transaction.
    ///
    /// Live records are inserted or overwritten; tombstones remove the local
    /// record. Items with entries in the pending operation log keep their
    /// local state until the push settles them. A record identical to the
    /// stored row and a token equal to the stored one write nothing, so a
    /// remote whose checkpoint filter is inclusive can hand back its boundary
    /// record on every pull.
    ///
    /// If any statement fails nothing is applied and the previous
    /// checkpoint stays in place.
    pub async fn apply_pull(
        &self,
        query_name: &str,
        records: &[RemoteRecord],
        token: &str,
    ) -> DbResult<PullApplied> {
        let mut tx = self.pool.begin().await?;
        let mut applied = PullApplied::default();

        for record in records {
            if has_pending(&mut tx, &record.item.id).await? {
                applied.skipped += 1;
            } else if record.deleted {
                if remove_item(&mut tx, &record.item.id).await? {
                    applied.deleted += 1;
                }
            } else if upsert_item(&mut tx, &record.item).await? {
                applied.upserted += 1;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (query_name, token, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(query_name) DO UPDATE SET
                token = excluded.token,
                updated_at = excluded.updated_at
            WHERE sync_checkpoints.token IS NOT excluded.token
            "#,
        )
        .bind(query_name)
        .bind(token)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            query = %query_name,
            upserted = applied.upserted,
            deleted = applied.deleted,
            skipped = applied.skipped,
            "Pull applied"
        );
        Ok(applied)
    }

    /// Forgets the checkpoint so the next pull fetches everything.
    ///
    /// Returns true if a checkpoint existed.
    pub async fn reset(&self, query_name: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_checkpoints WHERE query_name = ?1")
            .bind(query_name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use driftwood_core::Item;

    async fn setup_db() -> Database {
        Database::new(DbConfig::in_memory().run_migrations(true))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_pull_upserts_deletes_and_saves_token() {
        let db = setup_db().await;
        db.items()
            .stage_insert(&Item::new("old", "").with_id("a"), "item")
            .await
            .unwrap();
        db.items()
            .stage_insert(&Item::new("gone", "").with_id("b"), "item")
            .await
            .unwrap();
        for op in db.operations().list().await.unwrap() {
            db.operations().remove(op.sequence).await.unwrap();
        }

        let records = vec![
            RemoteRecord::live(Item::new("new", "").with_id("a")),
            RemoteRecord::live(Item::new("fresh", "").with_id("c")),
            RemoteRecord::tombstone(Item::new("", "").with_id("b")),
            RemoteRecord::tombstone(Item::new("", "").with_id("never-seen")),
        ];

        let applied = db
            .checkpoints()
            .apply_pull("allItem", &records, "42")
            .await
            .unwrap();
        assert_eq!(
            applied,
            PullApplied {
                upserted: 2,
                deleted: 1,
                skipped: 0
            }
        );

        assert_eq!(
            db.items().get_by_id("a").await.unwrap().unwrap().text,
            "new"
        );
        assert!(db.items().get_by_id("b").await.unwrap().is_none());
        assert!(db.items().get_by_id("c").await.unwrap().is_some());

        let checkpoint = db.checkpoints().get("allItem").await.unwrap().unwrap();
        assert_eq!(checkpoint.token, "42");
    }

    #[tokio::test]
    async fn test_queued_items_keep_local_state() {
        let db = setup_db().await;
        db.items()
            .stage_insert(&Item::new("mine", "").with_id("a"), "item")
            .await
            .unwrap();

        let records = vec![
            RemoteRecord::live(Item::new("theirs", "").with_id("a")),
            RemoteRecord::live(Item::new("other", "").with_id("b")),
        ];
        let applied = db
            .checkpoints()
            .apply_pull("allItem", &records, "9")
            .await
            .unwrap();
        assert_eq!(applied.skipped, 1);
        assert_eq!(applied.upserted, 1);
        assert_eq!(db.items().get_by_id("a").await.unwrap().unwrap().text, "mine");

        let tombstone = vec![RemoteRecord::tombstone(Item::new("", "").with_id("a"))];
        db.checkpoints()
            .apply_pull("allItem", &tombstone, "10")
            .await
            .unwrap();
        assert!(db.items().get_by_id("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reapplying_the_same_page_writes_nothing() {
        let db = setup_db().await;
        let records = vec![RemoteRecord::live(Item::new("x", "").with_id("x"))];

        let first = db
            .checkpoints()
            .apply_pull("allItem", &records, "t1")
            .await
            .unwrap();
        assert!(first.changed_anything());
        let saved = db.checkpoints().get("allItem").await.unwrap().unwrap();

        let again = db
            .checkpoints()
            .apply_pull("allItem", &records, "t1")
            .await
            .unwrap();
        assert_eq!(again, PullApplied::default());
        assert_eq!(db.checkpoints().get("allItem").await.unwrap().unwrap(), saved);
    }

    #[tokio::test]
    async fn test_checkpoints_are_per_query() {
        let db = setup_db().await;
        db.checkpoints().apply_pull("allItem", &[], "1").await.unwrap();
        db.checkpoints().apply_pull("openItem", &[], "7").await.unwrap();
        db.checkpoints().apply_pull("allItem", &[], "2").await.unwrap();

        assert_eq!(db.checkpoints().get("allItem").await.unwrap().unwrap().token, "2");
        assert_eq!(db.checkpoints().get("openItem").await.unwrap().unwrap().token, "7");
    }

    #[tokio::test]
    async fn test_reset() {
        let db = setup_db().await;
        assert!(!db.checkpoints().reset("allItem").await.unwrap());

        db.checkpoints().apply_pull("allItem", &[], "5").await.unwrap();
        assert!(db.checkpoints().reset("allItem").await.unwrap());
        assert!(db.checkpoints().get("allItem").await.unwrap().is_none());
    }
}
