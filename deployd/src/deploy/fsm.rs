//! Finite State Machine for a deployment run

use crate::errors::FsmError;
use crate::models::deployment::DeploymentStatus;

/// Trigger fed to the FSM by the run controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentTrigger {
    /// Run picked up
    Start,

    /// Every build step succeeded
    BuildSucceeded,

    /// Every deploy and verify step succeeded
    DeploySucceeded,

    /// Step failure, executor error or unexpected fault
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self::resume(DeploymentStatus::Pending)
    }

    /// Create an FSM positioned at a previously persisted status
    pub fn resume(state: DeploymentStatus) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get failure reason if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Status `trigger` would lead to, without changing the FSM
    pub fn next(&self, trigger: &DeploymentTrigger) -> Result<DeploymentStatus, FsmError> {
        use DeploymentStatus::*;
        match (self.state, trigger) {
            (Pending, DeploymentTrigger::Start) => Ok(Building),
            (Building, DeploymentTrigger::BuildSucceeded) => Ok(Deploying),
            (Deploying, DeploymentTrigger::DeploySucceeded) => Ok(Running),
            (Pending | Building | Deploying, DeploymentTrigger::Fail(_)) => Ok(Failed),
            (state, trigger) => Err(FsmError {
                from: state,
                trigger: trigger.clone(),
            }),
        }
    }

    /// Process a trigger and transition state
    pub fn process(&mut self, trigger: DeploymentTrigger) -> Result<DeploymentStatus, FsmError> {
        let new_state = self.next(&trigger)?;
        if let DeploymentTrigger::Fail(reason) = trigger {
            self.error = Some(reason);
        }
        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the store may record `to` directly after `from`
pub fn is_valid_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
    use DeploymentStatus::*;
    matches!(
        (from, to),
        (Pending, Building)
            | (Building, Deploying)
            | (Deploying, Running)
            | (Pending | Building | Deploying, Failed)
    )
}
