//! Error types for the deployment coordinator

use thiserror::Error;

use crate::deploy::fsm::DeploymentTrigger;
use crate::models::deployment::DeploymentStatus;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Bus error: {0}")]
    BusError(#[from] BusError),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Deployment {deployment_id} is already in progress for service {service_id}")]
    RunInProgress {
        service_id: String,
        deployment_id: String,
    },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for CoordinatorError {
    fn from(err: anyhow::Error) -> Self {
        CoordinatorError::Internal(err.to_string())
    }
}

/// Failure of a single external step
#[derive(Error, Debug)]
pub enum ExecError {
    /// The process could not be started at all
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with code {code}")]
    NonZeroExit {
        program: String,
        code: i32,
        /// Last stderr lines, oldest first
        stderr_tail: Vec<String>,
    },

    #[error("'{program}' was terminated by a signal")]
    Terminated { program: String },

    #[error("'{program}' timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Exit code, when the process ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, ExecError::Spawn { .. })
    }
}

/// Rejected state machine transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition: {from} -> {trigger:?}")]
pub struct FsmError {
    pub from: DeploymentStatus,
    pub trigger: DeploymentTrigger,
}

/// Record store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("deployment already exists: {0}")]
    AlreadyExists(String),

    #[error("deployment {id} is {status} and can no longer be modified")]
    Immutable { id: String, status: DeploymentStatus },

    #[error("deployment {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Log event bus failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("log stream for deployment {0} is closed")]
    Closed(String),
}
