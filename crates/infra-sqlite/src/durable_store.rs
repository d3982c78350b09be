// SQLite DurableStore Implementation

use crate::error::map_sqlx_error;
use crate::{create_pool, run_migrations};
use async_trait::async_trait;
use persistq_core::domain::{NewRecord, StoredRecord};
use persistq_core::error::Result;
use persistq_core::port::DurableStore;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the per-queue database inside `data_dir/<name>/`
pub const DATABASE_FILE: &str = "queue.db";

/// Durable FIFO backed by one SQLite database per queue name
pub struct SqliteDurableStore {
    name: String,
    path: PathBuf,
    pool: SqlitePool,
}

impl SqliteDurableStore {
    /// Open (or create) `data_dir/name/queue.db` and bring its schema up to date
    pub async fn open(name: &str, data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(DATABASE_FILE);
        let pool = create_pool(&path).await?;
        run_migrations(&pool).await?;

        let store = Self {
            name: name.to_string(),
            path,
            pool,
        };
        info!(
            queue = %store.name,
            path = %store.path.display(),
            "Opened durable store"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records moved to the dead-letter table
    pub async fn quarantined_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn append(&self, record: &NewRecord) -> Result<()> {
        sqlx::query("INSERT INTO queue_records (type_tag, payload, enqueued_at) VALUES (?, ?, ?)")
            .bind(&record.type_tag)
            .bind(&record.payload)
            .bind(record.enqueued_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn append_all(&self, records: &[NewRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for record in records {
            sqlx::query(
                "INSERT INTO queue_records (type_tag, payload, enqueued_at) VALUES (?, ?, ?)",
            )
            .bind(&record.type_tag)
            .bind(&record.payload)
            .bind(record.enqueued_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn prepend_all(&self, records: &[NewRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let head: Option<i64> = sqlx::query_scalar("SELECT MIN(seq) FROM queue_records")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        for (offset, record) in records.iter().enumerate() {
            // Empty log: a plain append already lands at the head
            let query = match head {
                Some(head) => sqlx::query(
                    "INSERT INTO queue_records (seq, type_tag, payload, enqueued_at) VALUES (?, ?, ?, ?)",
                )
                .bind(head - records.len() as i64 + offset as i64),
                None => sqlx::query(
                    "INSERT INTO queue_records (type_tag, payload, enqueued_at) VALUES (?, ?, ?)",
                ),
            };
            query
                .bind(&record.type_tag)
                .bind(&record.payload)
                .bind(record.enqueued_at)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(queue = %self.name, count = records.len(), "Prepended records");
        Ok(())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT seq, type_tag, payload, enqueued_at
            FROM queue_records
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(RecordRow::into_record).collect())
    }

    async fn consume(&self, seq: i64) -> Result<()> {
        sqlx::query("DELETE FROM queue_records WHERE seq = ?")
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn quarantine(&self, seq: i64, reason: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let moved = sqlx::query(
            r#"
            INSERT INTO queue_dead_letters (seq, type_tag, payload, enqueued_at, reason, quarantined_at)
            SELECT seq, type_tag, payload, enqueued_at, ?, ?
            FROM queue_records
            WHERE seq = ?
            "#,
        )
        .bind(reason)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(seq)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if moved.rows_affected() == 0 {
            warn!(queue = %self.name, seq, "Record to quarantine not found");
        }

        sqlx::query("DELETE FROM queue_records WHERE seq = ?")
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_records")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!(queue = %self.name, "Closed durable store");
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    seq: i64,
    type_tag: String,
    payload: String,
    enqueued_at: i64,
}

impl RecordRow {
    fn into_record(self) -> StoredRecord {
        StoredRecord {
            seq: self.seq,
            type_tag: self.type_tag,
            payload: self.payload,
            enqueued_at: self.enqueued_at,
        }
    }
}
