//! Message types for actor communication
//!
//! 1. **Commands**: request/response messages sent to one actor via mpsc,
//!    answered through a oneshot channel
//! 2. **Snapshots**: immutable state published through a `watch` channel for
//!    any number of readers

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{
    LastChannelValues, SensorReading, alert_log::AlertLogEntry, alerts::AlertEvent,
    storage::PersisterStats,
};

/// Commands that can be sent to the PipelineActor
#[derive(Debug)]
pub enum PipelineCommand {
    /// Run a processing cycle immediately (bypassing the interval timer)
    ProcessNow {
        respond_to: oneshot::Sender<CycleReport>,
    },

    /// Read the alert log, newest entry first
    ReadAlertLog {
        respond_to: oneshot::Sender<anyhow::Result<Vec<AlertLogEntry>>>,
    },

    /// Empty the alert log
    ClearAlertLog {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Get pipeline statistics
    GetStats {
        respond_to: oneshot::Sender<PipelineStats>,
    },

    /// Gracefully shut down the pipeline
    ///
    /// The actor runs a final cycle, closes the storage backend and then
    /// acknowledges.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands that can be sent to the BrokerSubscriber
#[derive(Debug)]
pub enum SubscriberCommand {
    /// Disconnect from the broker and stop
    Shutdown,
}

/// Outcome of one drain → decode → apply → notify cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Raw messages taken off the ingest queue
    pub received: usize,

    /// Messages that decoded into readings
    pub decoded: usize,

    /// Messages dropped because they failed to decode
    pub rejected: usize,

    /// Alerts raised during the cycle, in evaluation order
    pub alerts: Vec<AlertEvent>,

    /// Readings written to durable storage
    pub persisted: usize,
}

/// Running totals since the pipeline started
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub cycles: u64,
    pub received: u64,
    pub decoded: u64,
    pub rejected: u64,
    pub alerts: u64,

    /// Alerts that could not be written to the alert log
    pub alert_log_failures: u64,

    pub persister: PersisterStats,

    /// Readings currently in the rolling window
    pub window_len: usize,

    /// Timestamp of the newest decoded reading
    pub last_reading_at: Option<DateTime<Utc>>,
}

/// Immutable view of the pipeline published after every cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Rolling window, oldest first
    pub window: Vec<SensorReading>,

    /// Most recent alert raised since startup
    pub last_alert: Option<AlertEvent>,

    /// Gas channel values the next reading is compared against
    pub last_values: LastChannelValues,

    pub stats: PipelineStats,

    /// When this snapshot was published
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn latest(&self) -> Option<&SensorReading> {
        self.window.last()
    }
}
