//! Deployment record store
//!
//! The durable projection of each deployment: status, status history and log
//! history. Writers are the orchestrator (creation) and the deployment's own
//! run controller (everything after). Both histories are append-only and a
//! terminal deployment rejects every further write.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deploy::fsm::is_valid_transition;
use crate::errors::StoreError;
use crate::models::deployment::{Deployment, DeploymentStatus, LogEntry, StatusEvent};

pub use file::FileDeploymentStore;
pub use memory::MemoryDeploymentStore;

/// Page size used when a listing does not specify one
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on any listing page
pub const MAX_PAGE_SIZE: usize = 100;

/// Record store contract
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a freshly created deployment
    async fn create(&self, deployment: Deployment) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Deployment>, StoreError>;

    /// Most-recent-first deployments of a service
    async fn list_by_service(
        &self,
        service_id: &str,
        limit: usize,
    ) -> Result<Vec<Deployment>, StoreError>;

    /// Most-recent-first deployments of a project
    async fn list_by_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<Deployment>, StoreError>;

    /// Deployments that have not reached a terminal status
    async fn list_unfinished(&self) -> Result<Vec<Deployment>, StoreError>;

    /// Change status, appending the status event and the announcing log line
    /// in one write
    async fn record_transition(
        &self,
        id: &str,
        status: DeploymentStatus,
        at: DateTime<Utc>,
        message: String,
    ) -> Result<(), StoreError>;

    /// Append one log line
    async fn append_log(&self, id: &str, entry: LogEntry) -> Result<(), StoreError>;
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`
pub fn page_size(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}

pub(crate) fn apply_transition(
    deployment: &mut Deployment,
    status: DeploymentStatus,
    at: DateTime<Utc>,
    message: String,
) -> Result<(), StoreError> {
    ensure_mutable(deployment)?;
    if !is_valid_transition(deployment.status, status) {
        return Err(StoreError::InvalidTransition {
            id: deployment.id.clone(),
            from: deployment.status,
            to: status,
        });
    }

    let timestamp = at.max(deployment.last_timestamp());
    deployment.status = status;
    deployment.events.push(StatusEvent { status, timestamp });
    deployment.logs.push(LogEntry { timestamp, message });
    Ok(())
}

pub(crate) fn apply_log(deployment: &mut Deployment, entry: LogEntry) -> Result<(), StoreError> {
    ensure_mutable(deployment)?;
    let timestamp = entry.timestamp.max(deployment.last_timestamp());
    deployment.logs.push(LogEntry {
        timestamp,
        message: entry.message,
    });
    Ok(())
}

fn ensure_mutable(deployment: &Deployment) -> Result<(), StoreError> {
    if deployment.is_terminal() {
        return Err(StoreError::Immutable {
            id: deployment.id.clone(),
            status: deployment.status,
        });
    }
    Ok(())
}

/// Most-recent-first ordering with a stable tie-break
pub(crate) fn newest_first(a: &Deployment, b: &Deployment) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}
