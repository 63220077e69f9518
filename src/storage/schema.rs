//! Row layout of the `readings` table
//!
//! Every channel gets its own typed column so that history can be queried
//! per channel without decoding anything. Timestamps are stored as Unix
//! milliseconds (UTC).

use chrono::{DateTime, Utc};

use crate::SensorReading;

/// A single reading as stored in the database
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    /// Ingestion time as Unix milliseconds
    pub timestamp_ms: i64,
    pub ch4: f64,
    pub etoh: f64,
    pub h2: f64,
    pub nh3: f64,
    pub co: f64,
    pub no2: f64,
    pub oxygen: f64,
    pub distance: f64,
    pub flame: i64,
}

impl ReadingRow {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

impl From<&SensorReading> for ReadingRow {
    fn from(reading: &SensorReading) -> Self {
        Self {
            timestamp_ms: reading.timestamp.timestamp_millis(),
            ch4: reading.ch4,
            etoh: reading.etoh,
            h2: reading.h2,
            nh3: reading.nh3,
            co: reading.co,
            no2: reading.no2,
            oxygen: reading.oxygen,
            distance: reading.distance,
            flame: reading.flame,
        }
    }
}

impl TryFrom<ReadingRow> for SensorReading {
    type Error = super::StorageError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let timestamp = row.timestamp().ok_or_else(|| {
            super::StorageError::CorruptRow(format!("timestamp out of range: {}", row.timestamp_ms))
        })?;

        Ok(SensorReading {
            timestamp,
            ch4: row.ch4,
            etoh: row.etoh,
            h2: row.h2,
            nh3: row.nh3,
            co: row.co,
            no2: row.no2,
            oxygen: row.oxygen,
            distance: row.distance,
            flame: row.flame,
        })
    }
}
