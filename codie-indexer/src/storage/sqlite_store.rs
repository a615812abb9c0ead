//! Key/value sink on SQLite.
//!
//! Each record becomes one row keyed `chunk:<file>:<n>`, where `n` counts up
//! across the whole run. A membership table groups keys under a named index so
//! several indexes can share one database file.
//!
//! ```sql
//! CREATE TABLE chunks (
//!     index_name TEXT NOT NULL,
//!     key TEXT NOT NULL,        -- chunk:<file>:<n>
//!     file TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB NOT NULL,  -- little-endian f32 values
//!     PRIMARY KEY (index_name, key)
//! );
//!
//! CREATE TABLE index_members (
//!     index_name TEXT NOT NULL,
//!     key TEXT NOT NULL,
//!     PRIMARY KEY (index_name, key),
//!     FOREIGN KEY (index_name, key) REFERENCES chunks(index_name, key) ON DELETE CASCADE
//! );
//! ```

use super::{CodeRecord, RecordStore};
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    path: PathBuf,
    index_name: String,
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub async fn open(path: &Path, index_name: impl Into<String>) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::create_tables(&pool).await?;

        Ok(Self {
            path: path.to_path_buf(),
            index_name: index_name.into(),
            pool,
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                index_name TEXT NOT NULL,
                key TEXT NOT NULL,
                file TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (index_name, key)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_members (
                index_name TEXT NOT NULL,
                key TEXT NOT NULL,
                PRIMARY KEY (index_name, key),
                FOREIGN KEY (index_name, key) REFERENCES chunks(index_name, key) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn chunk_key(file: &str, n: usize) -> String {
        format!("chunk:{file}:{n}")
    }

    /// Number of keys currently grouped under this store's index
    pub async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_members WHERE index_name = ?1")
            .bind(&self.index_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// All records of this index, in key insertion order.
    pub async fn load(&self) -> Result<Vec<(String, CodeRecord)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT c.key, c.file, c.content, c.embedding
            FROM chunks c
            JOIN index_members m ON m.index_name = c.index_name AND m.key = c.key
            WHERE c.index_name = ?1
            ORDER BY c.rowid
            "#,
        )
        .bind(&self.index_name)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|row| {
                let key: String = row.get("key");
                let bytes: Vec<u8> = row.get("embedding");
                let record = CodeRecord {
                    file: row.get("file"),
                    content: row.get("content"),
                    embedding: decode_embedding(&bytes),
                };
                (key, record)
            })
            .collect();
        Ok(records)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn replace_all(&self, records: &[CodeRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let cleared = sqlx::query("DELETE FROM chunks WHERE index_name = ?1")
            .bind(&self.index_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM index_members WHERE index_name = ?1")
            .bind(&self.index_name)
            .execute(&mut *tx)
            .await?;
        tracing::debug!("Cleared {cleared} previous chunks from index {}", self.index_name);

        for (n, record) in records.iter().enumerate() {
            let key = Self::chunk_key(&record.file, n);
            sqlx::query(
                r#"
                INSERT INTO chunks (index_name, key, file, content, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(index_name, key) DO UPDATE SET
                    file = excluded.file,
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&self.index_name)
            .bind(&key)
            .bind(&record.file)
            .bind(&record.content)
            .bind(encode_embedding(&record.embedding))
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT OR IGNORE INTO index_members (index_name, key) VALUES (?1, ?2)")
                .bind(&self.index_name)
                .bind(&key)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(
            "Stored {} records in index {} ({})",
            records.len(),
            self.index_name,
            self.path.display()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite index {} in {}", self.index_name, self.path.display())
    }
}
