use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::alerts::AlertThresholds;
use crate::connection::ReconnectPolicy;
use crate::rolling::DEFAULT_WINDOW_CAPACITY;
use crate::storage::PersistPolicy;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// No durable storage
    #[serde(rename = "none")]
    None,

    /// Process-local storage, lost on restart
    Memory,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Readings older than this many days are deleted (None = keep forever)
        #[serde(default)]
        retention_days: Option<u32>,
    },
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::Sqlite { retention_days, .. } => *retention_days,
            _ => None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: None,
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./readings.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Storage configuration (defaults to SQLite)
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub persistence: PersistPolicy,

    #[serde(default)]
    pub alert_log: AlertLogConfig,

    #[serde(default)]
    pub thresholds: AlertThresholds,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BrokerConfig {
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Connect over TLS (required by hosted brokers on 8883)
    #[serde(default = "default_tls")]
    pub tls: bool,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

fn default_broker_port() -> u16 {
    8883
}

fn default_topic() -> String {
    String::from("multiSensor/numeric")
}

fn default_client_id() -> String {
    String::from("porty-hub")
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_tls() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct PipelineConfig {
    /// Processing cycle interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Number of readings kept in the rolling window
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Seed the rolling window from storage on startup
    #[serde(default = "default_warm_start")]
    pub warm_start: bool,
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            window_capacity: default_window_capacity(),
            warm_start: default_warm_start(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_warm_start() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct AlertLogConfig {
    #[serde(default = "default_alert_log_path")]
    pub path: PathBuf,
}

impl Default for AlertLogConfig {
    fn default() -> Self {
        Self {
            path: default_alert_log_path(),
        }
    }
}

fn default_alert_log_path() -> PathBuf {
    PathBuf::from("sensor_logs.txt")
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
