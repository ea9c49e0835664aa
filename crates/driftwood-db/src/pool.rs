//! # Local Database
//!
//! Opens the SQLite file (or a private in-memory database) that backs the
//! local store, and hands out the three repositories over one pool:
//! `items()`, `operations()` and `checkpoints()`.
//!
//! ## WAL Mode
//! File databases run in WAL (Write-Ahead Logging) mode so that readers
//! don't block the writer and a crash never leaves a half-applied pull.
//!
//! ## In-Memory Databases
//! An in-memory SQLite database lives exactly as long as its connection, so
//! [`DbConfig::in_memory`] pins the pool to one connection that never
//! expires. Callers must not touch the pool while holding a transaction.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations::{self, SchemaStatus};
use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::item::ItemRepository;
use crate::repository::operation::PendingOperationRepository;

// =============================================================================
// Configuration
// =============================================================================

/// How to open the local database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file. Ignored for in-memory databases.
    pub database_path: PathBuf,

    /// Use a private in-memory database instead of a file.
    pub in_memory: bool,

    /// Pool size. One for in-memory databases.
    pub max_connections: u32,

    pub min_connections: u32,

    /// How long a caller waits for a free connection.
    pub connect_timeout: Duration,

    /// `None` keeps idle connections open forever.
    pub idle_timeout: Option<Duration>,

    /// Migrate on open. Off by default: the local store migrates in
    /// `define_schema`.
    pub run_migrations: bool,
}

impl DbConfig {
    /// A file database at `path`; the file and its parent directory are
    /// created on open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            in_memory: false,
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: false,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// A private in-memory database on a single connection that never
    /// expires.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            in_memory: true,
            max_connections: 1, // The database dies with its only connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: false,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the local database. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database and, if configured, migrates it.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            in_memory = config.in_memory,
            "Initializing database connection"
        );

        let base_options = if config.in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            if let Some(parent) = config.database_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
                }
            }
            SqliteConnectOptions::new()
                .filename(&config.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        // Under WAL, NORMAL only risks the last commit on power loss.
        let connect_options = base_options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout);

        if config.in_memory {
            pool_options = pool_options.max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Applies outstanding migrations. Safe to repeat.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Returns how far the schema has been migrated.
    pub async fn schema_status(&self) -> DbResult<SchemaStatus> {
        migrations::schema_status(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Local item rows and the staged writes that queue them.
    pub fn items(&self) -> ItemRepository {
        ItemRepository::new(self.pool.clone())
    }

    /// The pending operation log.
    pub fn operations(&self) -> PendingOperationRepository {
        PendingOperationRepository::new(self.pool.clone())
    }

    /// Pull checkpoints and the atomic pull apply.
    pub fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.pool.clone())
    }

    /// Closes the pool; later repository calls fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::new(DbConfig::in_memory().run_migrations(true))
            .await
            .unwrap();
        db.run_migrations().await.unwrap();

        let status = db.schema_status().await.unwrap();
        assert!(status.is_current());
        assert!(status.known >= 1);
    }

    #[tokio::test]
    async fn test_unmigrated_status() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let status = db.schema_status().await.unwrap();
        assert_eq!(status.applied, 0);
        assert!(!status.is_current());
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("syncstore.db");

        let db = Database::new(DbConfig::new(&path).run_migrations(true))
            .await
            .unwrap();
        assert!(db.health_check().await);
        assert!(path.exists());
        db.close().await;
    }

    #[test]
    fn test_in_memory_config_pins_one_connection() {
        let config = DbConfig::in_memory();
        assert_eq!(config.max_connections, 1);
        assert!(config.idle_timeout.is_none());

        let file = DbConfig::new("/tmp/syncstore.db").max_connections(10);
        assert_eq!(file.max_connections, 10);
        assert!(file.idle_timeout.is_some());
        assert!(!file.in_memory);
    }
}
