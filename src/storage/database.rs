/// SQLite database bootstrap
///
/// Opens the engine database (`{data_dir}/autoflow.db`), creates the schema and
/// hands out the store implementations that share its connection pool.

use crate::error::StorageError;
use crate::storage::{SqliteAccountStore, SqliteLogSink, SqliteVariableStore};
use crate::workflow::storage::SqliteWorkflowStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

const DATABASE_FILE: &str = "autoflow.db";

/// Shared SQLite pool for every engine store
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file inside `data_dir`
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db_path = data_dir.as_ref().join(DATABASE_FILE);
        tracing::info!("🗄️ Opening engine database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let database = Self { pool };
        database.init_schema().await?;

        tracing::info!("✅ Engine database ready: {}", db_path.display());
        Ok(database)
    }

    /// Private in-memory database on a single connection
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let database = Self { pool };
        database.init_schema().await?;
        Ok(database)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn workflows(&self) -> SqliteWorkflowStore {
        SqliteWorkflowStore::new(self.pool.clone())
    }

    pub fn variables(&self) -> SqliteVariableStore {
        SqliteVariableStore::new(self.pool.clone())
    }

    pub fn accounts(&self) -> SqliteAccountStore {
        SqliteAccountStore::new(self.pool.clone())
    }

    pub fn logs(&self, max_entries: usize) -> SqliteLogSink {
        SqliteLogSink::new(self.pool.clone(), max_entries)
    }

    /// Create all engine tables
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS variables (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                category TEXT NOT NULL,
                service TEXT NOT NULL,
                account TEXT NOT NULL,
                fields TEXT NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (category, service, account)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                source TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_name ON workflows(name)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_source ON logs(source, level)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
