//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::bus::LogBus;
use crate::deploy::controller::RunDeps;
use crate::deploy::executor::ProcessExecutor;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::CoordinatorError;
use crate::models::pipeline::PipelineCatalog;
use crate::services::MemoryServiceRegistry;
use crate::store::{DeploymentStore, FileDeploymentStore, MemoryDeploymentStore};

/// Main application state
pub struct AppState {
    /// Deployment record store
    pub store: Arc<dyn DeploymentStore>,

    /// Service registry
    pub registry: Arc<MemoryServiceRegistry>,

    /// Log event bus
    pub bus: LogBus,

    /// Deployment trigger
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, CoordinatorError> {
        info!("Initializing application state...");

        let store: Arc<dyn DeploymentStore> = if options.storage.persist {
            let dir = options.storage.layout.deployment_dir();
            Arc::new(FileDeploymentStore::open(dir).await?)
        } else {
            warn!("Deployment records are kept in memory only");
            Arc::new(MemoryDeploymentStore::new())
        };

        let registry = Arc::new(MemoryServiceRegistry::new(options.services.clone()));
        info!("Service registry seeded with {} services", options.services.len());

        let bus = LogBus::new(options.bus.clone());

        let deps = RunDeps {
            store: store.clone(),
            registry: registry.clone(),
            bus: bus.clone(),
            executor: Arc::new(ProcessExecutor::new(options.run.step_timeout)),
            settings: options.run.settings.clone(),
        };
        let orchestrator = Orchestrator::new(deps, PipelineCatalog::new(options.pipelines.clone()));

        let recovered = orchestrator.recover_interrupted().await?;
        if recovered > 0 {
            warn!("Marked {} interrupted deployments as failed", recovered);
        }

        Ok(Self {
            store,
            registry,
            bus,
            orchestrator,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
