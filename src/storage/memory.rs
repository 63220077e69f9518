//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Running with `"backend": "memory"`
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: Oldest readings are evicted past `MAX_READINGS`

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::{HealthStatus, StorageBackend};
use super::error::StorageResult;
use super::schema::ReadingRow;

/// Maximum readings kept in memory
const MAX_READINGS: usize = 100_000;

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    readings: RwLock<VecDeque<ReadingRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_batch(&self, readings: Vec<ReadingRow>) -> StorageResult<()> {
        trace!("in-memory backend: inserting {} readings", readings.len());

        let mut stored = self.readings.write().await;
        stored.extend(readings);
        let excess = stored.len().saturating_sub(MAX_READINGS);
        if excess > 0 {
            stored.drain(..excess);
        }
        Ok(())
    }

    async fn query_latest(&self, limit: usize) -> StorageResult<Vec<ReadingRow>> {
        debug!("querying latest {limit} readings from memory");

        let stored = self.readings.read().await;
        let skip = stored.len().saturating_sub(limit);
        Ok(stored.iter().skip(skip).cloned().collect())
    }

    async fn cleanup_old_readings(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before = before.timestamp_millis();
        let mut stored = self.readings.write().await;
        let len = stored.len();
        stored.retain(|r| r.timestamp_ms >= before);
        Ok(len - stored.len())
    }

    async fn count(&self) -> StorageResult<usize> {
        Ok(self.readings.read().await.len())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_readings".to_string(), self.count().await?.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
