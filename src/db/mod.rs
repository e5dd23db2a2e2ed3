pub mod operations;
pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::schema::{schema_statements, SCHEMA_SQL, SCHEMA_VERSION};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Storage handle for concept, question and belief records.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, DbInitError> {
        if let Some(parent) = sqlite_file_parent(url) {
            std::fs::create_dir_all(&parent).map_err(|e| DbInitError::Io(e.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DbInitError::Config(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        tracing::info!(url, "mastery database ready");
        Ok(db)
    }

    /// Private in-memory database. Pinned to a single connection that never
    /// expires, since every SQLite memory connection is its own database.
    pub async fn connect_in_memory() -> Result<Self, DbInitError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbInitError::Config(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn schema_version(&self) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
            .fetch_optional(&self.pool)
            .await
    }

    async fn migrate(&self) -> Result<(), DbInitError> {
        let applied = self.schema_version().await.unwrap_or(None);
        if applied.as_deref() == Some(SCHEMA_VERSION) {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for stmt in schema_statements(SCHEMA_SQL) {
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }
        sqlx::query(
            r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
        )
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(version = SCHEMA_VERSION, "applied mastery schema");
        Ok(())
    }
}

fn sqlite_file_parent(url: &str) -> Option<std::path::PathBuf> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
