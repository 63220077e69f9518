//! PipelineActor - Owns every piece of downstream state
//!
//! ## Processing Cycle
//!
//! On every interval tick (or `ProcessNow` command) the actor runs one
//! cycle:
//!
//! ```text
//! drain queue → decode → evaluate alerts → append alert log
//!             → extend rolling window → persist → publish snapshot
//! ```
//!
//! Malformed payloads are dropped individually. Alert log and storage
//! failures are logged and counted but never stop the cycle, so the rolling
//! window and alerting keep working while either sink is unavailable.
//!
//! ## Ownership
//!
//! The rolling window, gas state, persister and alert log are only touched
//! from this task. Readers get an immutable [`Snapshot`] through a `watch`
//! channel and reach the alert log through commands.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{CycleReport, PipelineCommand, PipelineStats, Snapshot};
use crate::{
    LastChannelValues, SensorReading,
    alert_log::AlertLog,
    alerts::{AlertEvaluator, AlertEvent, AlertThresholds, Severity},
    config::{Config, PipelineConfig},
    decoder,
    queue::IngestQueue,
    rolling::RollingStore,
    storage::Persister,
};

/// Cleanup interval - run retention cleanup daily
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Shortest accepted cycle interval
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Runtime settings for the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub interval: Duration,
    pub window_capacity: usize,
    pub warm_start: bool,
    pub thresholds: AlertThresholds,
    pub retention_days: Option<u32>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.pipeline.interval(),
            window_capacity: config.pipeline.window_capacity,
            warm_start: config.pipeline.warm_start,
            thresholds: config.thresholds,
            retention_days: config.storage.retention_days(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            interval: pipeline.interval(),
            window_capacity: pipeline.window_capacity,
            warm_start: pipeline.warm_start,
            thresholds: AlertThresholds::default(),
            retention_days: None,
        }
    }
}

/// State threaded through decode and evaluate, owned by the processing cycle
#[derive(Debug)]
pub struct IngestContext {
    rolling: RollingStore,
    last_values: LastChannelValues,
    evaluator: AlertEvaluator,
}

impl IngestContext {
    pub fn new(window_capacity: usize, thresholds: AlertThresholds) -> Self {
        Self {
            rolling: RollingStore::new(window_capacity),
            last_values: LastChannelValues::default(),
            evaluator: AlertEvaluator::new(thresholds),
        }
    }

    /// Seed the rolling window without evaluating anything
    pub fn seed(&mut self, readings: Vec<SensorReading>) {
        self.rolling.append(readings);
    }

    /// Evaluate `reading` and advance the gas state
    pub fn evaluate(&mut self, reading: &SensorReading) -> Vec<AlertEvent> {
        let (events, next) = self.evaluator.evaluate(reading, &self.last_values);
        self.last_values = next;
        events
    }

    pub fn append(&mut self, readings: impl IntoIterator<Item = SensorReading>) {
        self.rolling.append(readings);
    }

    pub fn rolling(&self) -> &RollingStore {
        &self.rolling
    }

    pub fn last_values(&self) -> &LastChannelValues {
        &self.last_values
    }
}

/// Pipeline actor that drains the ingest queue on a fixed cadence
pub struct PipelineActor {
    context: IngestContext,
    queue: IngestQueue,
    persister: Persister,
    alert_log: AlertLog,
    settings: PipelineSettings,

    /// Command receiver
    command_rx: mpsc::Receiver<PipelineCommand>,

    /// Snapshot publisher
    snapshot_tx: watch::Sender<Arc<Snapshot>>,

    last_alert: Option<AlertEvent>,
    stats: PipelineStats,
}

impl PipelineActor {
    pub fn new(
        settings: PipelineSettings,
        queue: IngestQueue,
        persister: Persister,
        alert_log: AlertLog,
        command_rx: mpsc::Receiver<PipelineCommand>,
        snapshot_tx: watch::Sender<Arc<Snapshot>>,
    ) -> Self {
        debug!(
            "creating pipeline actor (interval {:?}, window {}, persistence {})",
            settings.interval,
            settings.window_capacity,
            if persister.is_enabled() {
                "enabled"
            } else {
                "disabled"
            }
        );

        Self {
            context: IngestContext::new(settings.window_capacity, settings.thresholds),
            queue,
            persister,
            alert_log,
            settings,
            command_rx,
            snapshot_tx,
            last_alert: None,
            stats: PipelineStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting pipeline actor");

        if self.settings.warm_start && self.persister.is_enabled() {
            let readings = self
                .persister
                .load_recent(self.context.rolling().capacity())
                .await;
            info!("warm start: seeded window with {} readings", readings.len());
            self.context.seed(readings);
            self.publish();
        }

        let period = self.settings.interval.max(MIN_INTERVAL);
        let mut cycle_interval = time::interval_at(Instant::now() + period, period);
        cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let has_retention = self.settings.retention_days.is_some() && self.persister.is_enabled();
        let mut cleanup_interval = time::interval(CLEANUP_INTERVAL);

        let mut shutdown_ack: Option<oneshot::Sender<()>> = None;

        loop {
            tokio::select! {
                _ = cycle_interval.tick() => {
                    self.process_cycle().await;
                }

                // First tick fires immediately, so cleanup also runs on startup
                _ = cleanup_interval.tick(), if has_retention => {
                    self.run_cleanup().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PipelineCommand::Shutdown { respond_to }) => {
                            info!("shutdown requested");
                            shutdown_ack = Some(respond_to);
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        // Final cycle so nothing queued before shutdown is lost
        if !self.queue.is_empty() {
            debug!("final cycle before shutdown ({} queued)", self.queue.len());
            self.process_cycle().await;
        }

        self.persister.close().await;

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }

        debug!("pipeline actor stopped");
    }

    async fn handle_command(&mut self, cmd: PipelineCommand) {
        match cmd {
            PipelineCommand::ProcessNow { respond_to } => {
                let report = self.process_cycle().await;
                let _ = respond_to.send(report);
            }

            PipelineCommand::ReadAlertLog { respond_to } => {
                let result: anyhow::Result<_> =
                    self.alert_log.read_all().await.map_err(Into::into);
                let _ = respond_to.send(result);
            }

            PipelineCommand::ClearAlertLog { respond_to } => {
                let result: anyhow::Result<()> =
                    self.alert_log.clear().await.map_err(Into::into);
                if result.is_ok() {
                    info!("alert log cleared");
                }
                let _ = respond_to.send(result);
            }

            PipelineCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.current_stats());
            }

            PipelineCommand::Shutdown { .. } => {
                // Handled in run()
            }
        }
    }

    /// One drain → decode → apply → notify pass
    async fn process_cycle(&mut self) -> CycleReport {
        self.stats.cycles += 1;

        let messages = self.queue.drain();
        if messages.is_empty() {
            trace!("cycle {}: queue empty", self.stats.cycles);
            return CycleReport::default();
        }

        let mut report = CycleReport {
            received: messages.len(),
            ..CycleReport::default()
        };
        let mut readings = Vec::with_capacity(messages.len());

        for message in messages {
            match decoder::decode(&message.payload, message.received_at) {
                Ok(reading) => {
                    for alert in self.context.evaluate(&reading) {
                        self.record_alert(&alert).await;
                        report.alerts.push(alert);
                    }
                    readings.push(reading);
                }
                Err(e) => {
                    report.rejected += 1;
                    warn!("dropping payload {:?}: {}", message.payload, e);
                }
            }
        }

        report.decoded = readings.len();
        self.context.append(readings.iter().cloned());
        report.persisted = self.persister.store(&readings).await;

        self.stats.received += report.received as u64;
        self.stats.decoded += report.decoded as u64;
        self.stats.rejected += report.rejected as u64;
        self.stats.alerts += report.alerts.len() as u64;

        debug!(
            "cycle {}: {} received, {} decoded, {} rejected, {} alert(s), {} persisted",
            self.stats.cycles,
            report.received,
            report.decoded,
            report.rejected,
            report.alerts.len(),
            report.persisted
        );

        self.publish();
        report
    }

    async fn record_alert(&mut self, alert: &AlertEvent) {
        match alert.severity() {
            Severity::Danger => warn!("{}", alert),
            Severity::Warning => info!("{}", alert),
        }

        if let Err(e) = self.alert_log.append(alert).await {
            self.stats.alert_log_failures += 1;
            error!("failed to write alert log: {}", e);
        }

        self.last_alert = Some(alert.clone());
    }

    async fn run_cleanup(&mut self) {
        let Some(days) = self.settings.retention_days else {
            return;
        };

        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        debug!("retention cleanup: removing readings before {}", cutoff);
        self.persister.cleanup(cutoff).await;
    }

    fn current_stats(&self) -> PipelineStats {
        PipelineStats {
            persister: self.persister.stats(),
            window_len: self.context.rolling().len(),
            last_reading_at: self.context.rolling().latest().map(|r| r.timestamp),
            ..self.stats.clone()
        }
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            window: self.context.rolling().window(),
            last_alert: self.last_alert.clone(),
            last_values: *self.context.last_values(),
            stats: self.current_stats(),
            updated_at: Some(Utc::now()),
        };
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}

/// Handle for interacting with the PipelineActor
#[derive(Clone)]
pub struct PipelineHandle {
    sender: mpsc::Sender<PipelineCommand>,
    snapshot_rx: watch::Receiver<Arc<Snapshot>>,
}

impl PipelineHandle {
    /// Spawn a new pipeline actor
    pub fn spawn(
        settings: PipelineSettings,
        queue: IngestQueue,
        persister: Persister,
        alert_log: AlertLog,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::default()));

        let actor = PipelineActor::new(settings, queue, persister, alert_log, cmd_rx, snapshot_tx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            snapshot_rx,
        }
    }

    /// Most recently published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified whenever a new snapshot is published
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn latest(&self) -> Option<SensorReading> {
        self.snapshot_rx.borrow().latest().cloned()
    }

    /// Rolling window, oldest first
    pub fn window(&self) -> Vec<SensorReading> {
        self.snapshot_rx.borrow().window.clone()
    }

    /// Alert log entries, newest first
    pub async fn alert_log(&self) -> anyhow::Result<Vec<crate::alert_log::AlertLogEntry>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PipelineCommand::ReadAlertLog { respond_to: tx })
            .await?;

        rx.await?
    }

    pub async fn clear_alert_log(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PipelineCommand::ClearAlertLog { respond_to: tx })
            .await?;

        rx.await?
    }

    /// Run a cycle now instead of waiting for the next tick
    pub async fn process_now(&self) -> anyhow::Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PipelineCommand::ProcessNow { respond_to: tx })
            .await?;

        Ok(rx.await?)
    }

    /// Get pipeline statistics
    pub async fn stats(&self) -> Option<PipelineStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PipelineCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Shut down the pipeline, waiting for the final cycle to complete
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(PipelineCommand::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}
