use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{DeploymentRequest, Repository};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    InProgress,
    Success,
    /// The deploy attempt was legitimate but did not go through.
    Failure,
    /// The request itself was malformed or infrastructure broke.
    Error,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentState::InProgress)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentState::InProgress => "in_progress",
            DeploymentState::Success => "success",
            DeploymentState::Failure => "failure",
            DeploymentState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Outcome report for one request, correlated by repository, deployment id and
/// delivery id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub state: DeploymentState,
    pub description: String,
    pub repository: Repository,
    pub deployment_id: i64,
    pub delivery_id: String,
    pub team: String,
    pub cluster: String,
    pub timestamp: i64,
}

impl DeploymentStatus {
    pub fn new(req: &DeploymentRequest, state: DeploymentState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
            repository: req.repository.clone(),
            deployment_id: req.deployment_id,
            delivery_id: req.delivery_id.clone(),
            team: req.payload_spec.team.clone(),
            cluster: req.cluster.clone(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn in_progress(req: &DeploymentRequest) -> Self {
        Self::new(req, DeploymentState::InProgress, "deployment in progress")
    }

    pub fn success(req: &DeploymentRequest, applied: usize) -> Self {
        Self::new(
            req,
            DeploymentState::Success,
            format!("all {applied} resources deployed"),
        )
    }

    pub fn failure(req: &DeploymentRequest, cause: impl std::fmt::Display) -> Self {
        Self::new(req, DeploymentState::Failure, cause.to_string())
    }

    pub fn error(req: &DeploymentRequest, cause: impl std::fmt::Display) -> Self {
        Self::new(req, DeploymentState::Error, cause.to_string())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
