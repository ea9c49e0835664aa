//! # Pending Operation Repository
//!
//! The local change log consumed by push.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  stage_* (ItemRepository) ──► pending                                  │
//! │                                  │                                      │
//! │        ┌─────────────────────────┼──────────────────────────┐          │
//! │        │ remote ok               │ transient / unexpected   │ conflict │
//! │        ▼                         ▼                          ▼          │
//! │   complete()             record_failure()      mark_needs_resolution() │
//! │   (removed, metadata     (attempts += 1,                    │          │
//! │    forwarded)             stays queued)                     ▼          │
//! │                                               apply_server_copy() or   │
//! │                                               remove()                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Version Forwarding
//! Every snapshot carries the server `version` that was current when it was
//! queued. Once an earlier entry for the same item is accepted by the remote,
//! later snapshots for that item would carry a stale version and be rejected
//! as conflicts against the client's own write. [`complete`] therefore
//! rewrites the server metadata of later entries for the same item in the same
//! transaction that removes the accepted one.
//!
//! [`complete`]: PendingOperationRepository::complete

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::item::upsert_item;
use driftwood_core::{Item, OperationStatus, PendingOperation};

const OPERATION_COLUMNS: &str = "sequence, id, kind, table_name, item_id, payload, status, \
                                 attempts, last_error, created_at, attempted_at";

/// Repository for the pending operation log.
#[derive(Debug, Clone)]
pub struct PendingOperationRepository {
    pool: SqlitePool,
}

impl PendingOperationRepository {
    /// Creates a new PendingOperationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PendingOperationRepository { pool }
    }

    /// Lists every queued operation in enqueue order.
    pub async fn list(&self) -> DbResult<Vec<PendingOperation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM pending_operations ORDER BY sequence ASC");
        let ops = sqlx::query_as::<_, PendingOperation>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(ops)
    }

    /// Gets one operation by sequence.
    pub async fn get(&self, sequence: i64) -> DbResult<Option<PendingOperation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM pending_operations WHERE sequence = ?1");
        let op = sqlx::query_as::<_, PendingOperation>(&sql)
            .bind(sequence)
            .fetch_optional(&self.pool)
            .await?;
        Ok(op)
    }

    /// Counts queued operations.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Flags an operation the remote rejected as a conflict.
    pub async fn mark_needs_resolution(&self, sequence: i64, error: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_operations SET
                status = ?2,
                last_error = ?3,
                attempted_at = ?4
            WHERE sequence = ?1
            "#,
        )
        .bind(sequence)
        .bind(OperationStatus::NeedsResolution)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PendingOperation", sequence.to_string()));
        }

        debug!(sequence, "Operation marked as needing resolution");
        Ok(())
    }

    /// Records a failed push attempt. Order and snapshot are left untouched.
    pub async fn record_failure(&self, sequence: i64, error: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_operations SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE sequence = ?1
            "#,
        )
        .bind(sequence)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PendingOperation", sequence.to_string()));
        }

        Ok(())
    }

    /// Removes an operation from the log.
    pub async fn remove(&self, sequence: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE sequence = ?1")
            .bind(sequence)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PendingOperation", sequence.to_string()));
        }

        Ok(())
    }

    /// Removes an operation the remote accepted.
    ///
    /// When the remote returned its copy, the server metadata is written to
    /// the local item (if it still exists) and forwarded to later queued
    /// snapshots of the same item. Nothing is enqueued.
    pub async fn complete(&self, sequence: i64, server_item: Option<&Item>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let op = take_operation(&mut tx, sequence).await?;

        if let Some(server) = server_item {
            sqlx::query("UPDATE items SET version = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(&op.item_id)
                .bind(&server.version)
                .bind(server.updated_at)
                .execute(&mut *tx)
                .await?;

            forward_metadata(&mut tx, &op, server).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Overwrites the local item with the server copy and removes the
    /// operation, atomically.
    pub async fn apply_server_copy(&self, sequence: i64, server_item: &Item) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        take_operation(&mut tx, sequence).await?;
        upsert_item(&mut tx, server_item).await?;

        tx.commit().await?;

        debug!(sequence, item_id = %server_item.id, "Local item reverted to server copy");
        Ok(())
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn take_operation(conn: &mut SqliteConnection, sequence: i64) -> DbResult<PendingOperation> {
    let sql = format!("SELECT {OPERATION_COLUMNS} FROM pending_operations WHERE sequence = ?1");
    let op = sqlx::query_as::<_, PendingOperation>(&sql)
        .bind(sequence)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("PendingOperation", sequence.to_string()))?;

    sqlx::query("DELETE FROM pending_operations WHERE sequence = ?1")
        .bind(sequence)
        .execute(&mut *conn)
        .await?;

    Ok(op)
}

async fn forward_metadata(
    conn: &mut SqliteConnection,
    accepted: &PendingOperation,
    server: &Item,
) -> DbResult<()> {
    let sql = format!(
        "SELECT {OPERATION_COLUMNS} FROM pending_operations \
         WHERE table_name = ?1 AND item_id = ?2 AND sequence > ?3 ORDER BY sequence"
    );
    let later = sqlx::query_as::<_, PendingOperation>(&sql)
        .bind(&accepted.table_name)
        .bind(&accepted.item_id)
        .bind(accepted.sequence)
        .fetch_all(&mut *conn)
        .await?;

    for op in later {
        let mut snapshot = op.item()?;
        snapshot.adopt_server_metadata(server);

        sqlx::query("UPDATE pending_operations SET payload = ?2 WHERE sequence = ?1")
            .bind(op.sequence)
            .bind(serde_json::to_string(&snapshot)?)
            .execute(&mut *conn)
            .await?;

        debug!(sequence = op.sequence, item_id = %op.item_id, "Forwarded server version");
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
