//! Best-effort durable sink for decoded readings
//!
//! The persister never fails the caller. Backend errors are logged and
//! counted, so the rolling window and alerting keep going while the durable
//! store is unavailable. A reading can therefore be visible live while
//! missing from storage.
//!
//! ## Write Policy
//!
//! - **per_reading**: one insert per reading
//! - **batched**: one transactional insert per cycle, split into chunks of
//!   `max_batch` readings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::SensorReading;

use super::StorageBackend;
use super::schema::ReadingRow;

/// Batch size used when none is configured
pub const DEFAULT_MAX_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PersistPolicy {
    PerReading,
    Batched {
        #[serde(default = "default_max_batch")]
        max_batch: usize,
    },
}

fn default_max_batch() -> usize {
    DEFAULT_MAX_BATCH
}

impl Default for PersistPolicy {
    fn default() -> Self {
        PersistPolicy::Batched {
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersisterStats {
    /// Readings written successfully
    pub stored: u64,

    /// Readings lost to backend errors
    pub failed: u64,

    /// Successful backend writes
    pub writes: u64,

    /// Readings removed by retention cleanup
    pub deleted: u64,
}

pub struct Persister {
    /// Optional durable backend (None = persistence disabled)
    backend: Option<Box<dyn StorageBackend>>,
    policy: PersistPolicy,
    stats: PersisterStats,
}

impl Persister {
    pub fn new(backend: Option<Box<dyn StorageBackend>>, policy: PersistPolicy) -> Self {
        let mode = if backend.is_some() {
            "persistent"
        } else {
            "disabled"
        };
        debug!("creating persister ({mode}, {policy:?})");

        Self {
            backend,
            policy,
            stats: PersisterStats::default(),
        }
    }

    /// A persister that drops everything
    pub fn disabled() -> Self {
        Self::new(None, PersistPolicy::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn stats(&self) -> PersisterStats {
        self.stats
    }

    /// Write `readings` according to the policy; returns how many were stored
    #[instrument(skip_all, fields(count = readings.len()))]
    pub async fn store(&mut self, readings: &[SensorReading]) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };
        if readings.is_empty() {
            return 0;
        }

        let chunk_size = match self.policy {
            PersistPolicy::PerReading => 1,
            PersistPolicy::Batched { max_batch } => max_batch.max(1),
        };

        let mut stored = 0;
        for chunk in readings.chunks(chunk_size) {
            let rows: Vec<ReadingRow> = chunk.iter().map(ReadingRow::from).collect();
            match backend.insert_batch(rows).await {
                Ok(()) => {
                    stored += chunk.len();
                    self.stats.stored += chunk.len() as u64;
                    self.stats.writes += 1;
                }
                Err(e) => {
                    self.stats.failed += chunk.len() as u64;
                    error!("failed to persist {} reading(s): {}", chunk.len(), e);
                }
            }
        }

        trace!("persisted {stored}/{} readings", readings.len());
        stored
    }

    /// The newest `limit` stored readings, oldest first.
    ///
    /// Errors are logged and yield an empty list.
    #[instrument(skip(self))]
    pub async fn load_recent(&self, limit: usize) -> Vec<SensorReading> {
        let Some(backend) = self.backend.as_ref() else {
            return Vec::new();
        };

        let rows = match backend.query_latest(limit).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("failed to load recent readings: {}", e);
                return Vec::new();
            }
        };

        let readings: Vec<SensorReading> = rows
            .into_iter()
            .filter_map(|row| match SensorReading::try_from(row) {
                Ok(reading) => Some(reading),
                Err(e) => {
                    warn!("skipping stored reading: {}", e);
                    None
                }
            })
            .collect();

        info!("loaded {} stored readings", readings.len());
        readings
    }

    /// Delete readings older than `before`
    #[instrument(skip(self))]
    pub async fn cleanup(&mut self, before: DateTime<Utc>) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        match backend.cleanup_old_readings(before).await {
            Ok(deleted) => {
                self.stats.deleted += deleted as u64;
                if deleted > 0 {
                    info!("retention cleanup deleted {deleted} readings");
                } else {
                    trace!("retention cleanup: nothing to delete");
                }
                deleted
            }
            Err(e) => {
                error!("failed to clean up old readings: {}", e);
                0
            }
        }
    }

    pub async fn close(&self) {
        if let Some(backend) = self.backend.as_ref() {
            debug!("closing backend");
            if let Err(e) = backend.close().await {
                error!("error closing backend: {}", e);
            }
        }
    }
}
