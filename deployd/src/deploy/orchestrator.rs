//! Deployment trigger
//!
//! Creates the PENDING record, opens its log topic and hands the run to a
//! supervised controller task. Only one run per service may be active.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::deploy::controller::{RunController, RunDeps};
use crate::errors::CoordinatorError;
use crate::models::deployment::{Deployment, DeploymentStatus, LogEntry};
use crate::models::pipeline::{PipelineCatalog, TemplateContext};
use crate::utils::generate_uuid;

/// A run that has been accepted and scheduled
pub struct StartedRun {
    /// The deployment as created, still PENDING
    pub deployment: Deployment,

    /// Resolves to the terminal status once the run finishes
    pub completion: JoinHandle<DeploymentStatus>,
}

type ActiveRuns = Arc<Mutex<HashMap<String, String>>>;

/// Reservation of a service's single run slot, released on drop
struct ActiveSlot {
    runs: ActiveRuns,
    service_id: String,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.remove(&self.service_id);
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    deps: RunDeps,
    pipelines: Arc<PipelineCatalog>,
    active: ActiveRuns,
}

impl Orchestrator {
    pub fn new(deps: RunDeps, pipelines: PipelineCatalog) -> Self {
        Self {
            deps,
            pipelines: Arc::new(pipelines),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn deps(&self) -> &RunDeps {
        &self.deps
    }

    /// Deployment currently running for a service, if any
    pub fn active_deployment(&self, service_id: &str) -> Option<String> {
        let runs = self.active.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(service_id).cloned()
    }

    /// Start a deployment of `service_id`.
    ///
    /// Returns once the PENDING record exists and its log stream is open; the
    /// run itself proceeds in the background.
    pub async fn deploy(
        &self,
        service_id: &str,
        version: Option<String>,
        commit_hash: Option<String>,
    ) -> Result<StartedRun, CoordinatorError> {
        let service = self
            .deps
            .registry
            .get(service_id)
            .await?
            .ok_or_else(|| CoordinatorError::ServiceNotFound(service_id.to_string()))?;

        let version = version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "latest".to_string());
        let commit_hash = commit_hash.filter(|c| !c.trim().is_empty());

        let mut deployment =
            Deployment::new(generate_uuid(), &service, Some(version.clone()), commit_hash, Utc::now());
        let slot = self.reserve(&service.id, &deployment.id)?;

        let created = format!(
            "Status: PENDING - deployment {} created for {} (version {})",
            deployment.id, service.name, version
        );
        deployment.logs.push(LogEntry {
            timestamp: deployment.created_at,
            message: created.clone(),
        });

        // The topic exists before the record so no reader mistakes it for a retired one
        self.deps.bus.open(&deployment.id);
        if let Err(e) = self.deps.store.create(deployment.clone()).await {
            self.deps.bus.discard(&deployment.id);
            return Err(e.into());
        }

        if let Err(e) = self.deps.bus.publish(
            &deployment.id,
            deployment.created_at,
            created,
            Some(DeploymentStatus::Pending),
        ) {
            warn!(deployment_id = %deployment.id, "Dropped log event: {}", e);
        }

        info!(
            deployment_id = %deployment.id,
            service_id = %service.id,
            version = %version,
            "Deployment created"
        );

        let ctx = TemplateContext::new(&service, &deployment);
        let pipeline = self.pipelines.for_runtime(&service.runtime).render(&ctx);
        let controller = RunController::new(&deployment, service, pipeline, self.deps.clone());
        let completion = tokio::spawn(supervise(controller, self.deps.clone(), slot));

        Ok(StartedRun {
            deployment,
            completion,
        })
    }

    /// Fail every deployment a previous process left unfinished.
    ///
    /// Nothing resumes an interrupted run, so its record would otherwise stay
    /// non-terminal and block readers waiting for a final status.
    pub async fn recover_interrupted(&self) -> Result<usize, CoordinatorError> {
        let unfinished = self.deps.store.list_unfinished().await?;
        for deployment in &unfinished {
            warn!(
                deployment_id = %deployment.id,
                status = %deployment.status,
                "Failing deployment interrupted by restart"
            );
            mark_failed(&self.deps, &deployment.id, "interrupted by coordinator restart").await;
        }
        Ok(unfinished.len())
    }

    fn reserve(&self, service_id: &str, deployment_id: &str) -> Result<ActiveSlot, CoordinatorError> {
        let mut runs = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = runs.get(service_id) {
            return Err(CoordinatorError::RunInProgress {
                service_id: service_id.to_string(),
                deployment_id: existing.clone(),
            });
        }
        runs.insert(service_id.to_string(), deployment_id.to_string());

        Ok(ActiveSlot {
            runs: self.active.clone(),
            service_id: service_id.to_string(),
        })
    }
}

/// Run the controller in its own task so a panic still ends in FAILED.
///
/// The service's slot is released before the log topic closes, so an observer
/// reacting to the end of the stream can trigger the next run right away.
async fn supervise(controller: RunController, deps: RunDeps, slot: ActiveSlot) -> DeploymentStatus {
    let deployment_id = controller.deployment_id().to_string();

    let status = match tokio::spawn(controller.run()).await {
        Ok(status) => status,
        Err(e) => {
            error!(deployment_id = %deployment_id, "Deployment run aborted: {}", e);
            mark_failed(&deps, &deployment_id, "internal error, run aborted").await
        }
    };

    drop(slot);
    deps.bus.complete(&deployment_id, status);
    status
}

/// Force a deployment into FAILED outside of its controller
async fn mark_failed(deps: &RunDeps, deployment_id: &str, reason: &str) -> DeploymentStatus {
    let message = format!("Status: FAILED - deployment failed: {}", reason);
    let now = Utc::now();

    let status = match deps
        .store
        .record_transition(deployment_id, DeploymentStatus::Failed, now, message.clone())
        .await
    {
        Ok(()) => {
            // Records from a previous process have no topic; readers replay the store
            if deps.bus.contains(deployment_id) {
                if let Err(e) =
                    deps.bus
                        .publish(deployment_id, now, message, Some(DeploymentStatus::Failed))
                {
                    warn!(deployment_id = %deployment_id, "Dropped log event: {}", e);
                }
            }
            DeploymentStatus::Failed
        }
        Err(e) => {
            error!(deployment_id = %deployment_id, "Failed to record FAILED status: {}", e);
            match deps.store.get(deployment_id).await {
                Ok(Some(deployment)) if deployment.is_terminal() => deployment.status,
                _ => DeploymentStatus::Failed,
            }
        }
    };

    status
}
