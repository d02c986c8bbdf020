//! File-backed record store
//!
//! Records live in memory and every write is flushed to
//! `<dir>/<deployment id>.json` (temp file + rename) before it returns. A
//! change becomes visible to readers only once it is on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::StoreError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{Deployment, DeploymentStatus, LogEntry};
use crate::store::memory::MemoryDeploymentStore;
use crate::store::{apply_log, apply_transition, DeploymentStore};

pub struct FileDeploymentStore {
    dir: Dir,
    records: MemoryDeploymentStore,
    /// Serializes writers between reading a record and publishing its update
    write_lock: Mutex<()>,
}

impl FileDeploymentStore {
    /// Open the store, loading every record already present in `dir`
    pub async fn open(dir: Dir) -> Result<Self, StoreError> {
        dir.create().await?;

        let mut loaded = Vec::new();
        for path in dir.list_files("json").await? {
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Deployment>(&bytes) {
                Ok(deployment) => loaded.push(deployment),
                Err(e) => warn!("Skipping unreadable deployment record {}: {}", path.display(), e),
            }
        }

        let interrupted = loaded.iter().filter(|d| !d.is_terminal()).count();
        info!(
            "Loaded {} deployment records from {} ({} not terminal)",
            loaded.len(),
            dir.path().display(),
            interrupted
        );

        Ok(Self {
            dir,
            records: MemoryDeploymentStore::with_records(loaded),
            write_lock: Mutex::new(()),
        })
    }

    /// Apply `f` to a copy of the record, write the copy, then swap it in
    async fn update<F>(&self, id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Deployment) -> Result<(), StoreError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut updated = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(&mut updated)?;
        self.persist(&updated).await?;
        self.records.replace(updated).await;
        Ok(())
    }

    async fn persist(&self, deployment: &Deployment) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(deployment)?;
        self.dir
            .file(&format!("{}.json", deployment.id))
            .write_atomic(&bytes)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn create(&self, deployment: Deployment) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.records.get(&deployment.id).await?.is_some() {
            return Err(StoreError::AlreadyExists(deployment.id));
        }
        self.persist(&deployment).await?;
        self.records.create(deployment).await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        self.records.get(id).await
    }

    async fn list_by_service(
        &self,
        service_id: &str,
        limit: usize,
    ) -> Result<Vec<Deployment>, StoreError> {
        self.records.list_by_service(service_id, limit).await
    }

    async fn list_by_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<Deployment>, StoreError> {
        self.records.list_by_project(project_id, limit).await
    }

    async fn list_unfinished(&self) -> Result<Vec<Deployment>, StoreError> {
        self.records.list_unfinished().await
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
    }

    async fn append_log(&self, id: &str, entry: LogEntry) -> Result<(), StoreError> {
        self.update(id, |d| apply_log(d, entry)).await
    }
}
