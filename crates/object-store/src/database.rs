//! SQLite database for blob metadata storage.

use std::path::Path;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Row,
};

use crate::error::Result;

/// Blob metadata stored in SQLite.
#[derive(Debug, Clone)]
pub(crate) struct BlobMetadata {
    pub key: String,
    pub content_hash: String,
    pub size: i64,
    pub created_at: i64,
}

/// SQLite database connection pool.
#[derive(Debug, Clone)]
pub(crate) struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from a file path.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace a blob record.
    pub async fn upsert_blob(&self, key: &str, content_hash: &str, size: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO blobs (key, content_hash, size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_hash = excluded.content_hash,
                size = excluded.size,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(content_hash)
        .bind(size)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a blob record recovered from storage, keeping any existing row.
    pub async fn insert_recovered(&self, key: &str, content_hash: &str, size: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO blobs (key, content_hash, size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(content_hash)
        .bind(size)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get blob metadata by key.
    pub async fn get_blob(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT key, content_hash, size, created_at
            FROM blobs
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| BlobMetadata {
            key: r.get("key"),
            content_hash: r.get("content_hash"),
            size: r.get("size"),
            created_at: r.get("created_at"),
        }))
    }

    /// Check if a blob exists.
    pub async fn has_blob(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Delete a blob record.
    pub async fn delete_blob(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blobs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all blob keys, newest first.
    pub async fn list_blobs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM blobs ORDER BY created_at DESC, key ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|r| r.get("key")).collect())
    }

    /// Count blobs.
    pub async fn count_blobs(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM blobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Get total size of all blobs.
    pub async fn total_size(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(size), 0) as total FROM blobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }
}
