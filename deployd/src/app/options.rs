//! Application configuration options

use std::collections::BTreeMap;
use std::time::Duration;

use crate::bus::BusOptions;
use crate::deploy::controller::RunSettings;
use crate::models::pipeline::PipelineTemplate;
use crate::models::service::Service;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::CooldownOptions;
use crate::workers::retention;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Log event bus options
    pub bus: BusOptions,

    /// Retention worker options
    pub retention_worker: retention::Options,

    /// Deployment run options
    pub run: RunOptions,

    /// Services seeded into the registry
    pub services: Vec<Service>,

    /// Pipeline template per runtime
    pub pipelines: BTreeMap<String, PipelineTemplate>,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let step_timeout =
            (settings.run.step_timeout_secs > 0).then(|| Duration::from_secs(settings.run.step_timeout_secs));

        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions {
                layout,
                persist: settings.store.persist,
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            bus: BusOptions {
                subscriber_capacity: settings.bus.subscriber_capacity,
                retention: Duration::from_secs(settings.bus.retention_secs),
            },
            retention_worker: retention::Options {
                interval: Duration::from_secs(settings.bus.sweep_interval_secs.max(1)),
            },
            run: RunOptions {
                step_timeout,
                settings: RunSettings {
                    retry_backoff: CooldownOptions {
                        base_delay: Duration::from_millis(settings.run.retry_base_delay_ms),
                        max_delay: Duration::from_millis(settings.run.retry_max_delay_ms),
                        ..Default::default()
                    },
                },
            },
            services: settings.services.clone(),
            pipelines: settings.pipelines.clone(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Keep deployment records on disk
    pub persist: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            persist: true,
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Deployment run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Kill a step running longer than this
    pub step_timeout: Option<Duration>,

    pub settings: RunSettings,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            step_timeout: Some(Duration::from_secs(600)),
            settings: RunSettings::default(),
        }
    }
}
