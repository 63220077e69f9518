//! Failure tests for the pipeline
//!
//! These tests verify that the pipeline handles failures gracefully:
//! - Storage outages never block alerting or the rolling window
//! - Alert log write failures are counted, not fatal
//! - Malformed payloads are dropped one at a time
//! - Losing the producer side does not stop the pipeline
//! - An unhealthy backend is refused when storage is opened

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use porty::actors::pipeline::{PipelineHandle, PipelineSettings};
use porty::alert_log::AlertLog;
use porty::alerts::AlertKind;
use porty::queue::{IngestQueue, RawMessage};
use porty::storage::{PersistPolicy, Persister, StorageError, ensure_healthy};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_storage_outage_does_not_block_alerts() {
    let inserts = Arc::new(AtomicUsize::new(0));
    let backend = FailingBackend {
        inserts: inserts.clone(),
    };
    let pipeline = TestPipeline::spawn(manual_settings(), Some(Box::new(backend)));

    pipeline.push(payload([0.0; 5], 0.0, 20.9, 100.0, 0));
    pipeline.push(QUIET_PAYLOAD);
    let report = pipeline.handle.process_now().await.unwrap();

    assert_eq!(report.decoded, 2);
    assert_eq!(report.persisted, 0);
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].kind, AlertKind::FlameDetected);
    assert_eq!(inserts.load(Ordering::SeqCst), 1);

    // Visible live while missing from storage
    assert_eq!(pipeline.handle.window().len(), 2);
    assert_eq!(pipeline.handle.alert_log().await.unwrap().len(), 1);

    let stats = pipeline.handle.stats().await.unwrap();
    assert_eq!(stats.persister.failed, 2);
    assert_eq!(stats.persister.stored, 0);

    pipeline.handle.shutdown().await;
}

#[tokio::test]
async fn test_per_reading_policy_isolates_failures() {
    let inserts = Arc::new(AtomicUsize::new(0));
    let backend = FailingBackend {
        inserts: inserts.clone(),
    };
    let pipeline = TestPipeline::spawn_with_policy(
        manual_settings(),
        Some(Box::new(backend)),
        PersistPolicy::PerReading,
    );

    for _ in 0..3 {
        pipeline.push(QUIET_PAYLOAD);
    }
    pipeline.handle.process_now().await.unwrap();

    assert_eq!(inserts.load(Ordering::SeqCst), 3);
    assert_eq!(pipeline.handle.window().len(), 3);

    pipeline.handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_warm_start_leaves_window_empty() {
    let settings = PipelineSettings {
        warm_start: true,
        ..manual_settings()
    };
    let pipeline = TestPipeline::spawn(settings, Some(Box::new(FailingBackend::default())));

    let stats = pipeline.handle.stats().await.unwrap();
    assert_eq!(stats.window_len, 0);

    pipeline.push(QUIET_PAYLOAD);
    pipeline.handle.process_now().await.unwrap();
    assert_eq!(pipeline.handle.window().len(), 1);

    pipeline.handle.shutdown().await;
}

#[tokio::test]
async fn test_unwritable_alert_log_is_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (sender, queue) = IngestQueue::new();
    let handle = PipelineHandle::spawn(
        manual_settings(),
        queue,
        Persister::disabled(),
        // Parent directory does not exist
        AlertLog::new(dir.path().join("missing").join("sensor_logs.txt")),
    );

    sender.push(RawMessage::new(payload([0.0; 5], 6.0, 20.9, 100.0, 0)));
    let report = handle.process_now().await.unwrap();

    assert_eq!(report.alerts.len(), 2);
    assert_eq!(handle.window().len(), 1);
    assert!(handle.snapshot().last_alert.is_some());

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.alert_log_failures, 2);
    assert_eq!(stats.alerts, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_malformed_payloads_never_partially_apply() {
    let pipeline = TestPipeline::spawn(manual_settings(), None);

    pipeline.push("0,0,0,0,0,9.9,20.9,100");
    pipeline.push("0,0,0,0,0,9.9,20.9,100,1,7");
    pipeline.push("0,0,0,0,0,high,20.9,100,0");
    pipeline.push("");
    pipeline.push(QUIET_PAYLOAD);

    let report = pipeline.handle.process_now().await.unwrap();
    assert_eq!(report.received, 5);
    assert_eq!(report.rejected, 4);
    assert_eq!(report.decoded, 1);
    assert!(report.alerts.is_empty());
    assert!(pipeline.handle.alert_log().await.unwrap().is_empty());
    assert_eq!(pipeline.handle.window().len(), 1);

    pipeline.handle.shutdown().await;
}

#[tokio::test]
async fn test_pipeline_survives_producer_drop() {
    let dir = tempfile::tempdir().unwrap();
    let (sender, queue) = IngestQueue::new();
    let handle = PipelineHandle::spawn(
        manual_settings(),
        queue,
        Persister::disabled(),
        AlertLog::new(dir.path().join("sensor_logs.txt")),
    );

    sender.push(RawMessage::new(QUIET_PAYLOAD));
    drop(sender);

    // Messages queued before the drop are still processed
    let report = handle.process_now().await.unwrap();
    assert_eq!(report.decoded, 1);

    let report = handle.process_now().await.unwrap();
    assert_eq!(report.received, 0);
    assert!(handle.stats().await.is_some());
    assert!(handle.latest().is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_commands_after_shutdown_fail_cleanly() {
    let pipeline = TestPipeline::spawn(manual_settings(), None);
    pipeline.handle.shutdown().await;

    assert!(pipeline.handle.process_now().await.is_err());
    assert!(pipeline.handle.alert_log().await.is_err());
    assert!(pipeline.handle.stats().await.is_none());

    // Shutting down twice is harmless
    pipeline.handle.shutdown().await;
}

#[tokio::test]
async fn test_unhealthy_backend_is_refused() {
    let result = ensure_healthy(Box::new(FailingBackend::default())).await;
    assert!(matches!(
        result,
        Err(StorageError::UnhealthyBackend(message)) if message == "database offline"
    ));
}
