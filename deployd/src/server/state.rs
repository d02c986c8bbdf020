//! Server state

use std::sync::Arc;

use crate::bus::LogBus;
use crate::deploy::orchestrator::Orchestrator;
use crate::services::ServiceRegistry;
use crate::store::DeploymentStore;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn DeploymentStore>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub bus: LogBus,
    pub orchestrator: Orchestrator,
}

impl ServerState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let deps = orchestrator.deps();
        Self {
            store: deps.store.clone(),
            registry: deps.registry.clone(),
            bus: deps.bus.clone(),
            orchestrator,
        }
    }
}
