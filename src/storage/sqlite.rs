//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked while the pipeline writes
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **Replication**: No built-in replication (file-level backups only)
//! - **Distributed**: Single-machine only

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::ReadingRow;

const SELECT_COLUMNS: &str =
    "timestamp_ms, ch4, etoh, h2, nh3, co, no2, oxygen, distance, flame";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ```no_run
    /// # use porty::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./readings.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn row_to_reading(row: &SqliteRow) -> StorageResult<ReadingRow> {
        Ok(ReadingRow {
            timestamp_ms: row.try_get("timestamp_ms")?,
            ch4: real(row, "ch4")?,
            etoh: real(row, "etoh")?,
            h2: real(row, "h2")?,
            nh3: real(row, "nh3")?,
            co: real(row, "co")?,
            no2: real(row, "no2")?,
            oxygen: real(row, "oxygen")?,
            distance: real(row, "distance")?,
            flame: row.try_get("flame")?,
        })
    }
}

/// NaN is written as NULL, so NULL reads back as NaN
fn real(row: &SqliteRow, column: &str) -> StorageResult<f64> {
    let value: Option<f64> = row.try_get(column)?;
    Ok(value.unwrap_or(f64::NAN))
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, readings), fields(count = readings.len()))]
    async fn insert_batch(&self, readings: Vec<ReadingRow>) -> StorageResult<()> {
        if readings.is_empty() {
            return Ok(());
        }

        debug!("inserting {} readings into SQLite", readings.len());

        let mut tx = self.pool.begin().await?;

        for reading in readings {
            sqlx::query(
                r#"
                INSERT INTO readings (
                    timestamp_ms, ch4, etoh, h2, nh3, co, no2, oxygen, distance, flame
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(reading.timestamp_ms)
            .bind(reading.ch4)
            .bind(reading.etoh)
            .bind(reading.h2)
            .bind(reading.nh3)
            .bind(reading.co)
            .bind(reading.no2)
            .bind(reading.oxygen)
            .bind(reading.distance)
            .bind(reading.flame)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("batch insert complete");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_latest(&self, limit: usize) -> StorageResult<Vec<ReadingRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM readings ORDER BY timestamp_ms DESC, id DESC LIMIT ?"
        );

        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut results = rows
            .iter()
            .map(Self::row_to_reading)
            .collect::<StorageResult<Vec<_>>>()?;

        // Reverse to get chronological order (oldest first)
        results.reverse();
        debug!("query returned {} readings", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_readings(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        info!("cleaning up readings older than {}", before);

        let result = sqlx::query("DELETE FROM readings WHERE timestamp_ms < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old readings", deleted);

        Ok(deleted)
    }

    async fn count(&self) -> StorageResult<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match self.count().await {
            Ok(total) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                    ("total_readings".to_string(), total.to_string()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
