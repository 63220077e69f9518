//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! durable reading stores implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::ReadingRow;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for durable reading stores
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are moved into the
/// pipeline task.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`; implementations convert their own
/// errors to `StorageError` variants.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert a batch of readings
    ///
    /// Implementations should write the batch atomically, so a failed batch
    /// leaves no partial rows behind.
    async fn insert_batch(&self, readings: Vec<ReadingRow>) -> StorageResult<()>;

    /// The newest `limit` readings, oldest first
    ///
    /// Used to warm the rolling window on startup.
    async fn query_latest(&self, limit: usize) -> StorageResult<Vec<ReadingRow>>;

    /// Delete readings older than `before`, returning how many were removed
    async fn cleanup_old_readings(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Total number of stored readings
    async fn count(&self) -> StorageResult<usize>;

    /// Lightweight check that the backend is operational
    ///
    /// Called once when the backend is opened; an unhealthy backend is
    /// refused.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
