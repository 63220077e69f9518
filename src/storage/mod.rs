//! Durable storage for decoded readings
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: All operations are async for use inside the pipeline task
//! - **Best-effort**: `Persister` wraps a backend and never fails the caller
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, feature `storage-sqlite`
//! - **In-Memory**: Process-local, lost on restart; `"backend": "memory"`
//!
//! `"backend": "none"` opens no backend and disables persistence.
//!
//! ## Usage
//!
//! ```no_run
//! use porty::storage::{Persister, PersistPolicy, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./readings.db").await?;
//!     let persister = Persister::new(Some(Box::new(backend)), PersistPolicy::default());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod persister;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use tracing::info;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use persister::{PersistPolicy, Persister, PersisterStats};
pub use schema::ReadingRow;

use crate::config::StorageConfig;

/// Open the backend described by `config`
///
/// `StorageConfig::None` yields no backend at all, which disables
/// persistence. Any other backend must pass [`ensure_healthy`].
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Option<Box<dyn StorageBackend>>> {
    let backend: Box<dyn StorageBackend> = match config {
        StorageConfig::None => {
            info!("persistence disabled");
            return Ok(None);
        }
        StorageConfig::Memory => {
            info!("using in-memory storage");
            Box::new(memory::MemoryBackend::new())
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Box::new(sqlite::SqliteBackend::new(path).await?),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            return Err(StorageError::InvalidConfig(
                "sqlite backend requires the `storage-sqlite` feature".to_string(),
            ));
        }
    };

    ensure_healthy(backend).await.map(Some)
}

/// Run the backend's health check, refusing it when unhealthy
pub async fn ensure_healthy(
    backend: Box<dyn StorageBackend>,
) -> StorageResult<Box<dyn StorageBackend>> {
    let status = backend.health_check().await?;
    if !status.healthy {
        return Err(StorageError::UnhealthyBackend(status.message));
    }

    info!("{} ({:?})", status.message, status.metadata);
    Ok(backend)
}
