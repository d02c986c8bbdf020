//! Service registry
//!
//! Services are owned by an external CRUD layer. The coordinator reads a
//! service when a deployment starts and writes its observed status once, when
//! a deployment reaches RUNNING.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::CoordinatorError;
use crate::models::service::{Service, ServiceStatus};

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn get(&self, service_id: &str) -> Result<Option<Service>, CoordinatorError>;

    async fn set_status(&self, service_id: &str, status: ServiceStatus) -> Result<(), CoordinatorError>;
}

/// Registry held in process memory, seeded from settings
#[derive(Debug, Clone, Default)]
pub struct MemoryServiceRegistry {
    services: Arc<RwLock<HashMap<String, Service>>>,
}

impl MemoryServiceRegistry {
    pub fn new(services: impl IntoIterator<Item = Service>) -> Self {
        let services = services.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            services: Arc::new(RwLock::new(services)),
        }
    }
}

#[async_trait]
impl ServiceRegistry for MemoryServiceRegistry {
    async fn get(&self, service_id: &str) -> Result<Option<Service>, CoordinatorError> {
        let services = self.services.read().await;
        Ok(services.get(service_id).cloned())
    }

    async fn set_status(&self, service_id: &str, status: ServiceStatus) -> Result<(), CoordinatorError> {
        let mut services = self.services.write().await;
        let service = services
            .get_mut(service_id)
            .ok_or_else(|| CoordinatorError::ServiceNotFound(service_id.to_string()))?;
        service.status = status;
        Ok(())
    }
}
