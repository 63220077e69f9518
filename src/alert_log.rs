//! Append-only alert log file
//!
//! Each alert is one UTF-8 line:
//!
//! ```text
//! 2025-10-18T03:12:45.123456+00:00 - 🔴 NO2 danger! Current value: 6.000 ppm
//! ```
//!
//! Reading the log converts timestamps to the fixed UTC+9 display offset and
//! returns the newest entry first.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::alerts::AlertEvent;

/// Separator between timestamp and message on each line
pub const DELIMITER: &str = " - ";

/// Display offset for log entries (UTC+9)
const DISPLAY_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Error)]
pub enum AlertLogError {
    #[error("failed to write alert log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read alert log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to clear alert log {path}: {source}")]
    Clear {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One parsed line of the alert log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertLogEntry {
    /// When the alert was detected, in the display offset
    pub detected_at: DateTime<FixedOffset>,
    pub message: String,
}

/// File-backed alert log
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one alert as a single line
    #[instrument(skip_all, fields(kind = ?event.kind))]
    pub async fn append(&self, event: &AlertEvent) -> Result<(), AlertLogError> {
        let line = format_line(event);

        let write = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        };

        write.await.map_err(|source| AlertLogError::Write {
            path: self.path.clone(),
            source,
        })?;

        debug!("logged alert: {}", line.trim_end());
        Ok(())
    }

    /// All entries, newest first
    #[instrument(skip(self))]
    pub async fn read_all(&self) -> Result<Vec<AlertLogEntry>, AlertLogError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AlertLogError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut entries: Vec<AlertLogEntry> = content.lines().filter_map(parse_line).collect();
        entries.reverse();
        Ok(entries)
    }

    /// Remove every entry. Irreversible.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), AlertLogError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("alert log cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AlertLogError::Clear {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn format_line(event: &AlertEvent) -> String {
    format!(
        "{}{DELIMITER}{}\n",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
        event.message()
    )
}

fn parse_line(line: &str) -> Option<AlertLogEntry> {
    let (timestamp, message) = line.split_once(DELIMITER)?;

    let parsed = match DateTime::parse_from_rfc3339(timestamp.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("skipping alert log line with bad timestamp {timestamp:?}: {e}");
            return None;
        }
    };

    let offset = FixedOffset::east_opt(DISPLAY_OFFSET_SECS)?;

    Some(AlertLogEntry {
        detected_at: parsed.with_timezone(&offset),
        message: message.trim().to_string(),
    })
}
