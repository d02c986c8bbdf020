//! Settings file management

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::CoordinatorError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::pipeline::PipelineTemplate;
use crate::models::service::Service;

/// Coordinator settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit stdout logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub store: StoreSettings,

    /// Services known to the registry at startup
    #[serde(default)]
    pub services: Vec<Service>,

    /// Pipeline template per service runtime
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineTemplate>,
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it does not exist
    pub async fn load(file: &File) -> Result<Self, CoordinatorError> {
        if !file.exists().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await.map_err(|e| {
            CoordinatorError::ConfigError(format!(
                "invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

fn default_true() -> bool {
    true
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Log event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Queue bound per stream subscriber
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Seconds a completed deployment stays replayable from memory
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_subscriber_capacity() -> usize {
    1024
}

fn default_retention_secs() -> u64 {
    900
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Deployment run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Per-step time limit, 0 disables it
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_step_timeout_secs() -> u64 {
    600
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// Record store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Write deployment records to disk
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { persist: true }
    }
}
