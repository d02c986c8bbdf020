//! Deployment run controller
//!
//! One controller drives one deployment from PENDING to a terminal status.
//! It is the only writer of its deployment while it runs. Every log line and
//! transition is written to the record store first and published on the bus
//! second.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::bus::LogBus;
use crate::deploy::classify::{classify, StepOutcome};
use crate::deploy::executor::{LineSink, OutputLine, StepExecutor};
use crate::deploy::fsm::{DeploymentFsm, DeploymentTrigger};
use crate::errors::{FsmError, StoreError};
use crate::models::deployment::{Deployment, DeploymentStatus, LogEntry};
use crate::models::pipeline::{PhaseKind, Pipeline, StepSpec};
use crate::models::service::{Service, ServiceStatus};
use crate::services::ServiceRegistry;
use crate::store::DeploymentStore;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Run-level settings
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Backoff between attempts of a step declaring retries
    pub retry_backoff: CooldownOptions,
}

/// Collaborators shared by every run
#[derive(Clone)]
pub struct RunDeps {
    pub store: Arc<dyn DeploymentStore>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub bus: LogBus,
    pub executor: Arc<dyn StepExecutor>,
    pub settings: RunSettings,
}

/// Why a run stopped before RUNNING
#[derive(Debug, thiserror::Error)]
enum RunFailure {
    #[error("step '{step}' in {phase} phase failed: {reason}")]
    Step {
        phase: PhaseKind,
        step: String,
        reason: String,
    },

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Fsm(#[from] FsmError),
}

/// Writes log lines and transitions for one deployment, keeping timestamps
/// non-decreasing
struct Recorder {
    deployment_id: String,
    store: Arc<dyn DeploymentStore>,
    bus: LogBus,
    last: DateTime<Utc>,
}

impl Recorder {
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.last);
        self.last = now;
        now
    }

    async fn log(&mut self, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        let timestamp = self.now();
        self.store
            .append_log(
                &self.deployment_id,
                LogEntry {
                    timestamp,
                    message: message.clone(),
                },
            )
            .await?;
        self.publish(timestamp, message, None);
        Ok(())
    }

    async fn transition(
        &mut self,
        status: DeploymentStatus,
        message: String,
    ) -> Result<(), StoreError> {
        let timestamp = self.now();
        self.store
            .record_transition(&self.deployment_id, status, timestamp, message.clone())
            .await?;
        self.publish(timestamp, message, Some(status));
        Ok(())
    }

    fn publish(&self, timestamp: DateTime<Utc>, message: String, status: Option<DeploymentStatus>) {
        if let Err(e) = self.bus.publish(&self.deployment_id, timestamp, message, status) {
            warn!(deployment_id = %self.deployment_id, "Dropped log event: {}", e);
        }
    }
}

/// Sink that records each output line of a running step
struct StepSink<'a> {
    recorder: &'a mut Recorder,
    error: Option<StoreError>,
}

#[async_trait]
impl LineSink for StepSink<'_> {
    async fn line(&mut self, line: OutputLine) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.recorder.log(line.to_string()).await {
            self.error = Some(e);
        }
    }
}

/// Controller for a single deployment run
pub struct RunController {
    service: Service,
    version: String,
    pipeline: Pipeline,
    fsm: DeploymentFsm,
    recorder: Recorder,
    registry: Arc<dyn ServiceRegistry>,
    executor: Arc<dyn StepExecutor>,
    settings: RunSettings,
}

impl RunController {
    pub fn new(deployment: &Deployment, service: Service, pipeline: Pipeline, deps: RunDeps) -> Self {
        Self {
            service,
            version: deployment
                .version
                .clone()
                .unwrap_or_else(|| "latest".to_string()),
            pipeline,
            fsm: DeploymentFsm::resume(deployment.status),
            recorder: Recorder {
                deployment_id: deployment.id.clone(),
                store: deps.store,
                bus: deps.bus,
                last: deployment.last_timestamp(),
            },
            registry: deps.registry,
            executor: deps.executor,
            settings: deps.settings,
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.recorder.deployment_id
    }

    /// Drive the deployment to a terminal status. Failures never escape: they
    /// end up as the FAILED status and its log lines. Closing the log topic
    /// is left to the caller.
    pub async fn run(mut self) -> DeploymentStatus {
        info!(
            deployment_id = %self.deployment_id(),
            service_id = %self.service.id,
            "Deployment run started"
        );

        let status = match self.drive().await {
            Ok(()) => {
                self.mark_service_running().await;
                DeploymentStatus::Running
            }
            Err(failure) => self.fail(failure).await,
        };

        info!(deployment_id = %self.deployment_id(), %status, "Deployment run finished");
        status
    }

    async fn drive(&mut self) -> Result<(), RunFailure> {
        let target = format!("{}:{}", self.service.name, self.version);

        self.transition(DeploymentTrigger::Start, format!("building {}", target))
            .await?;
        self.run_phase(PhaseKind::Build).await?;

        self.transition(
            DeploymentTrigger::BuildSucceeded,
            format!("build finished, deploying {}", target),
        )
        .await?;
        self.run_phase(PhaseKind::Deploy).await?;
        self.run_phase(PhaseKind::Verify).await?;

        self.transition(
            DeploymentTrigger::DeploySucceeded,
            format!(
                "deployment succeeded, {} is running version {}",
                self.service.name, self.version
            ),
        )
        .await?;
        Ok(())
    }

    /// Persist the next status, then commit it to the FSM. A failed write
    /// leaves the FSM where the store still is.
    async fn transition(&mut self, trigger: DeploymentTrigger, detail: String) -> Result<(), RunFailure> {
        let status = self.fsm.next(&trigger)?;
        self.recorder
            .transition(status, format!("Status: {} - {}", status, detail))
            .await?;
        self.fsm.process(trigger)?;
        info!(deployment_id = %self.deployment_id(), %status, "Deployment status changed");
        Ok(())
    }

    async fn run_phase(&mut self, kind: PhaseKind) -> Result<(), RunFailure> {
        let steps = self
            .pipeline
            .phase(kind)
            .map(|p| p.steps.clone())
            .unwrap_or_default();

        if steps.is_empty() {
            self.recorder.log(format!("[{}] no steps", kind)).await?;
            return Ok(());
        }

        for step in &steps {
            self.run_step(kind, step).await?;
        }
        Ok(())
    }

    async fn run_step(&mut self, phase: PhaseKind, step: &StepSpec) -> Result<(), RunFailure> {
        let attempts = step.retries.saturating_add(1);
        let mut attempt = 1;

        self.recorder
            .log(format!("[{}] {}: {}", phase, step.name, step.command))
            .await?;

        loop {
            let mut sink = StepSink {
                recorder: &mut self.recorder,
                error: None,
            };
            let result = self.executor.run(&step.command, &mut sink).await;
            if let Some(e) = sink.error.take() {
                return Err(e.into());
            }

            let err = match result {
                Ok(()) => {
                    self.recorder
                        .log(format!("[{}] {}: done", phase, step.name))
                        .await?;
                    return Ok(());
                }
                Err(err) => err,
            };

            match classify(&err, step.benign.as_ref()) {
                StepOutcome::BenignAbsence { reason } => {
                    info!(
                        deployment_id = %self.deployment_id(),
                        step = %step.name,
                        "Step target absent, continuing: {}", reason
                    );
                    self.recorder
                        .log(format!("[{}] {}: nothing to do ({})", phase, step.name, reason))
                        .await?;
                    return Ok(());
                }
                StepOutcome::Failure { reason } if attempt < attempts => {
                    let delay = calc_exp_backoff(&self.settings.retry_backoff, attempt - 1);
                    warn!(
                        deployment_id = %self.deployment_id(),
                        step = %step.name,
                        "Step failed, retrying in {:?}: {}", delay, reason
                    );
                    self.recorder
                        .log(format!(
                            "[{}] {}: failed ({}), retrying in {}ms (attempt {}/{})",
                            phase,
                            step.name,
                            reason,
                            delay.as_millis(),
                            attempt + 1,
                            attempts
                        ))
                        .await?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                StepOutcome::Failure { reason } => {
                    self.recorder
                        .log(format!("[{}] {}: ERROR {}", phase, step.name, reason))
                        .await?;
                    return Err(RunFailure::Step {
                        phase,
                        step: step.name.clone(),
                        reason,
                    });
                }
            }
        }
    }

    async fn fail(&mut self, failure: RunFailure) -> DeploymentStatus {
        error!(deployment_id = %self.deployment_id(), "Deployment failed: {}", failure);

        if let Err(e) = self.fsm.process(DeploymentTrigger::Fail(failure.to_string())) {
            error!(deployment_id = %self.deployment_id(), "Cannot mark deployment failed: {}", e);
            return self.fsm.state();
        }

        let message = format!("Status: FAILED - deployment failed: {}", failure);
        if let Err(e) = self
            .recorder
            .transition(DeploymentStatus::Failed, message.clone())
            .await
        {
            // Observers still learn the outcome even if the store is down
            error!(deployment_id = %self.deployment_id(), "Failed to persist FAILED status: {}", e);
            let at = self.recorder.now();
            self.recorder
                .publish(at, message, Some(DeploymentStatus::Failed));
        }
        DeploymentStatus::Failed
    }

    async fn mark_service_running(&self) {
        if let Err(e) = self
            .registry
            .set_status(&self.service.id, ServiceStatus::Running)
            .await
        {
            error!(
                deployment_id = %self.deployment_id(),
                service_id = %self.service.id,
                "Failed to update service status: {}", e
            );
        }
    }
}
