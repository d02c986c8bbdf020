//! In-memory record store

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::StoreError;
use crate::models::deployment::{Deployment, DeploymentStatus, LogEntry};
use crate::store::{apply_log, apply_transition, newest_first, DeploymentStore};

#[derive(Debug, Clone, Default)]
pub struct MemoryDeploymentStore {
    records: Arc<RwLock<HashMap<String, Deployment>>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with existing records
    pub fn with_records(records: impl IntoIterator<Item = Deployment>) -> Self {
        let records = records.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Apply `f` to one record under the write lock and return the updated copy
    pub(crate) async fn update<F>(&self, id: &str, f: F) -> Result<Deployment, StoreError>
    where
        F: FnOnce(&mut Deployment) -> Result<(), StoreError> + Send,
    {
        let mut records = self.records.write().await;
        let deployment = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(deployment)?;
        Ok(deployment.clone())
    }

    /// Overwrite a record with an already validated copy
    pub(crate) async fn replace(&self, deployment: Deployment) {
        let mut records = self.records.write().await;
        records.insert(deployment.id.clone(), deployment);
    }

    async fn list_where<P>(&self, predicate: P, limit: usize) -> Vec<Deployment>
    where
        P: Fn(&Deployment) -> bool,
    {
        let records = self.records.read().await;
        let mut matching: Vec<Deployment> = records.values().filter(|d| predicate(d)).cloned().collect();
        matching.sort_by(newest_first);
        matching.truncate(limit);
        matching
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn create(&self, deployment: Deployment) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&deployment.id) {
            return Err(StoreError::AlreadyExists(deployment.id));
        }
        records.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn list_by_service(
        &self,
        service_id: &str,
        limit: usize,
    ) -> Result<Vec<Deployment>, StoreError> {
        Ok(self.list_where(|d| d.service_id == service_id, limit).await)
    }

    async fn list_by_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<Deployment>, StoreError> {
        Ok(self.list_where(|d| d.project_id == project_id, limit).await)
    }

    async fn list_unfinished(&self) -> Result<Vec<Deployment>, StoreError> {
        Ok(self.list_where(|d| !d.is_terminal(), usize::MAX).await)
    }

    async fn record_transition(
        &self,
        id: &str,
        status: DeploymentStatus,
        at: DateTime<Utc>,
        message: String,
    ) -> Result<(), StoreError> {
        self.update(id, |d| apply_transition(d, status, at, message))
            .await
            .map(|_| ())
    }

    async fn append_log(&self, id: &str, entry: LogEntry) -> Result<(), StoreError> {
        self.update(id, |d| apply_log(d, entry)).await.map(|_| ())
    }
}
