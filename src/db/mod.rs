//! Embedded state store
//!
//! Single-writer SQLite persistence for run records, memory items (plus
//! their FTS5 index), and the tool-result cache. Uses sqlx with WAL mode;
//! migrations are embedded and idempotent.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod memory;
pub mod runs;
pub mod tool_cache;

pub use memory::{
    user_scope, MemoryHit, MemoryItem, MemoryKind, MemoryRepository, MemorySearch, MemoryStats,
    MemoryUpsert, GLOBAL_SCOPE,
};
pub use runs::RunRepository;
pub use tool_cache::{ToolCacheHit, ToolCacheRepository};

/// State-store connection pool
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (creating if missing) the store at `db_path`, enable WAL mode,
    /// and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        info!("Opening state store at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create state store directory")?;
            }
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to state store")?;

        debug!("State store connection established");

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run embedded migrations. Safe to run repeatedly.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        sqlx::raw_sql(include_str!("../../migrations/002_fts_memory.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 002_fts_memory.sql")?;

        debug!("State store migrations completed");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush the WAL and close all connections. Call during shutdown.
    pub async fn close(self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        self.pool.close().await;
        Ok(())
    }

    /// Run-record repository
    pub fn runs(&self) -> RunRepository {
        RunRepository::new(self.pool.clone())
    }

    /// Memory-item repository
    pub fn memory(&self) -> MemoryRepository {
        MemoryRepository::new(self.pool.clone())
    }

    /// Tool-cache repository
    pub fn tool_cache(&self) -> ToolCacheRepository {
        ToolCacheRepository::new(self.pool.clone())
    }
}
