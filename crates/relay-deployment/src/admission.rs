//! Per-agent admission of deployment requests.
//!
//! Every agent sees every request. Cluster ownership is decided first so that
//! requests meant for someone else never produce a status; freshness second.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::DeploymentRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("your message belongs in another cluster")]
    NotMyCluster,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl AdmissionError {
    /// Whether the originator should hear about this rejection.
    pub fn reports_status(self) -> bool {
        !matches!(self, AdmissionError::NotMyCluster)
    }

    /// Label for the discard counter.
    pub fn reason(self) -> &'static str {
        match self {
            AdmissionError::NotMyCluster => "not_my_cluster",
            AdmissionError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

pub fn matches_cluster(req: &DeploymentRequest, cluster: &str) -> Result<(), AdmissionError> {
    if req.cluster != cluster {
        return Err(AdmissionError::NotMyCluster);
    }
    Ok(())
}

/// Fails once `now` is past the deadline. A request is still actionable during
/// its deadline second.
pub fn meets_deadline(req: &DeploymentRequest, now: DateTime<Utc>) -> Result<(), AdmissionError> {
    if now > req.deadline_at() {
        return Err(AdmissionError::DeadlineExceeded);
    }
    Ok(())
}

pub fn admit(
    req: &DeploymentRequest,
    cluster: &str,
    now: DateTime<Utc>,
) -> Result<(), AdmissionError> {
    matches_cluster(req, cluster)?;
    meets_deadline(req, now)
}
