//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Readings are persisted to the SQLite backend
//! - A restarted pipeline warm-starts its window from storage
//! - Retention cleanup removes old readings on startup
//! - The configured backend is opened from config
//! - Readings with unreadable measurements are alerted on and stored

use chrono::{Duration, Utc};
use porty::actors::pipeline::PipelineSettings;
use porty::alerts::AlertKind;
use porty::config::StorageConfig;
use porty::storage::sqlite::SqliteBackend;
use porty::storage::{ReadingRow, StorageBackend, open_backend};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

fn old_row(days_ago: i64) -> ReadingRow {
    ReadingRow {
        timestamp_ms: (Utc::now() - Duration::days(days_ago)).timestamp_millis(),
        ch4: 0.0,
        etoh: 0.0,
        h2: 0.0,
        nh3: 0.0,
        co: 0.0,
        no2: 0.1,
        oxygen: 20.9,
        distance: days_ago as f64,
        flame: 1,
    }
}

#[tokio::test]
async fn test_readings_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("readings.db");

    // First run: ingest and shut down
    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let pipeline = TestPipeline::spawn(manual_settings(), Some(Box::new(backend)));
    for i in 0..5 {
        pipeline.push(payload([0.0; 5], 0.0, 20.9, i as f64, 1));
    }
    let report = pipeline.handle.process_now().await.unwrap();
    assert_eq!(report.persisted, 5);
    pipeline.handle.shutdown().await;

    // Second run: the window is seeded from the database
    let backend = SqliteBackend::new(&db_path).await.unwrap();
    assert_eq!(backend.count().await.unwrap(), 5);

    let pipeline = TestPipeline::spawn(manual_settings(), Some(Box::new(backend)));
    let stats = pipeline.handle.stats().await.unwrap();
    assert_eq!(stats.window_len, 5);

    let distances: Vec<_> = pipeline.handle.window().iter().map(|r| r.distance).collect();
    assert_eq!(distances, vec![0.0, 1.0, 2.0, 3.0, 4.0]);

    pipeline.handle.shutdown().await;
}

#[tokio::test]
async fn test_warm_start_respects_window_capacity() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("readings.db");

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let rows: Vec<_> = (0..20).rev().map(old_row).collect();
    backend.insert_batch(rows).await.unwrap();

    let settings = PipelineSettings {
        window_capacity: 4,
        ..manual_settings()
    };
    let pipeline = TestPipeline::spawn(settings, Some(Box::new(backend)));
    pipeline.handle.stats().await.unwrap();

    // Newest four, oldest first
    let distances: Vec<_> = pipeline.handle.window().iter().map(|r| r.distance).collect();
    assert_eq!(distances, vec![3.0, 2.0, 1.0, 0.0]);

    pipeline.handle.shutdown().await;
}

#[tokio::test]
async fn test_retention_cleanup_on_startup() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("readings.db");

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    backend
        .insert_batch(vec![old_row(40), old_row(35), old_row(1)])
        .await
        .unwrap();

    let settings = PipelineSettings {
        retention_days: Some(30),
        warm_start: false,
        ..manual_settings()
    };
    let pipeline = TestPipeline::spawn(settings, Some(Box::new(backend)));

    // Cleanup runs on the first loop iteration
    let mut deleted = 0;
    for _ in 0..50 {
        deleted = pipeline.handle.stats().await.unwrap().persister.deleted;
        if deleted > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(deleted, 2);
    pipeline.handle.shutdown().await;

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    assert_eq!(backend.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_open_backend_from_config() {
    let temp_dir = tempdir().unwrap();
    let config = StorageConfig::Sqlite {
        path: temp_dir.path().join("configured.db"),
        retention_days: None,
    };

    let backend = open_backend(&config).await.unwrap().unwrap();
    let health = backend.health_check().await.unwrap();
    assert!(health.healthy);
    backend.close().await.unwrap();

    assert!(open_backend(&StorageConfig::None).await.unwrap().is_none());
    assert!(open_backend(&StorageConfig::Memory).await.unwrap().is_some());
}

#[tokio::test]
async fn test_nan_oxygen_is_alerted_and_stored() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("readings.db");

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let pipeline = TestPipeline::spawn(manual_settings(), Some(Box::new(backend)));
    pipeline.push("0,0,0,0,0,0.5,nan,100,1");

    let report = pipeline.handle.process_now().await.unwrap();
    assert_eq!(report.decoded, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].kind, AlertKind::OxygenOutOfRange);
    pipeline.handle.shutdown().await;

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let stored = backend.query_latest(1).await.unwrap();
    assert!(stored[0].oxygen.is_nan());
    assert_eq!(stored[0].no2, 0.5);
}
