//! # Schema Migrations
//!
//! The local store schema ships inside the binary as embedded SQL files.
//!
//! ## Schema
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_initial_schema.sql                                                │
//! │                                                                         │
//! │  items               id PK · text · description · done                 │
//! │                      version · updated_at        (server metadata)     │
//! │                                                                         │
//! │  pending_operations  sequence AUTOINCREMENT (push order)               │
//! │                      kind · table_name · item_id · payload (snapshot)  │
//! │                      status · attempts · last_error                    │
//! │                                                                         │
//! │  sync_checkpoints    query_name PK · token · updated_at                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applying is idempotent, so `define_schema` may run on every start. New
//! schema changes go in a new `NNN_description.sql` file; applied files are
//! never edited.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// How far a database's schema has been migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStatus {
    /// Migrations embedded in this build.
    pub known: usize,
    /// Migrations recorded as applied in the database.
    pub applied: usize,
}

impl SchemaStatus {
    /// Returns true when every embedded migration has been applied.
    pub fn is_current(&self) -> bool {
        self.applied >= self.known
    }

    /// Migrations still to apply.
    pub fn outstanding(&self) -> usize {
        self.known.saturating_sub(self.applied)
    }
}

/// Applies every outstanding migration, each in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let before = schema_status(pool).await?;
    if before.is_current() {
        debug!(applied = before.applied, "Local schema is current");
        return Ok(());
    }

    MIGRATOR.run(pool).await?;

    info!(
        applied = before.outstanding(),
        total = before.known,
        "Local schema migrated"
    );
    Ok(())
}

/// Reads the migration bookkeeping. A database that was never migrated has
/// no bookkeeping table and reports zero applied.
pub async fn schema_status(pool: &SqlitePool) -> DbResult<SchemaStatus> {
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    Ok(SchemaStatus {
        known: MIGRATOR.migrations.len(),
        applied: applied.max(0) as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_status_arithmetic() {
        let fresh = SchemaStatus { known: 1, applied: 0 };
        assert!(!fresh.is_current());
        assert_eq!(fresh.outstanding(), 1);

        let done = SchemaStatus { known: 1, applied: 1 };
        assert!(done.is_current());
        assert_eq!(done.outstanding(), 0);
    }
}
