//! Service models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of workload a service runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    Web,
    Worker,
    Cron,
}

/// Observed status of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    #[default]
    Stopped,
    Failed,
    Deploying,
}

/// A deployable unit and its desired configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,

    pub project_id: String,

    pub name: String,

    #[serde(default, rename = "type")]
    pub kind: ServiceKind,

    /// Runtime name, selects the pipeline template
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Environment variables passed to every step
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub status: ServiceStatus,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_replicas() -> u32 {
    1
}

impl Service {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            kind: ServiceKind::default(),
            runtime: default_runtime(),
            replicas: default_replicas(),
            env: BTreeMap::new(),
            status: ServiceStatus::default(),
        }
    }
}
