//! Deployment models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::service::Service;

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Created, run not yet started
    Pending,

    /// Build phase in progress
    Building,

    /// Deploy and verify phases in progress
    Deploying,

    /// Successfully deployed
    Running,

    /// Deployment failed
    Failed,
}

impl DeploymentStatus {
    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Running | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Deploying => "DEPLOYING",
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a deployment's status history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: DeploymentStatus,
    pub timestamp: DateTime<Utc>,
}

/// One line of a deployment's log history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A single orchestration run for a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Service being deployed
    pub service_id: String,

    /// Project owning the service
    pub project_id: String,

    /// Current status
    pub status: DeploymentStatus,

    /// Status history, first entry is always PENDING at creation time
    pub events: Vec<StatusEvent>,

    /// Log history
    pub logs: Vec<LogEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a new deployment record in PENDING
    pub fn new(
        id: String,
        service: &Service,
        version: Option<String>,
        commit_hash: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            service_id: service.id.clone(),
            project_id: service.project_id.clone(),
            status: DeploymentStatus::Pending,
            events: vec![StatusEvent {
                status: DeploymentStatus::Pending,
                timestamp: created_at,
            }],
            logs: Vec::new(),
            commit_hash,
            version,
            created_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Timestamp of the latest event or log line
    pub fn last_timestamp(&self) -> DateTime<Utc> {
        let last_event = self.events.last().map(|e| e.timestamp);
        let last_log = self.logs.last().map(|l| l.timestamp);
        last_event
            .into_iter()
            .chain(last_log)
            .max()
            .unwrap_or(self.created_at)
    }
}
