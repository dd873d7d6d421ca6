//! Inbound trigger events and their translation into deployment requests.

use chrono::{DateTime, Duration, Utc};
use relay_deployment::{DeploymentRequest, PayloadSpec, Repository, RepositoryError, RequestError};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Faults attributable to whoever sent the trigger. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no repository specified")]
    NoRepository,
    #[error(transparent)]
    InvalidRepository(#[from] RepositoryError),
    #[error("deployment object is empty")]
    EmptyDeployment,
    #[error("environment is not specified")]
    NoEnvironment,
    #[error("payload is invalid: {0}")]
    InvalidPayload(String),
    #[error("event is invalid: {0}")]
    InvalidEvent(String),
    #[error("payload team {payload:?} does not match authenticated team {authenticated:?}")]
    TeamMismatch {
        authenticated: String,
        payload: String,
    },
}

/// Why a trigger produced no request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Deployment event as sent by the source-control webhook.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default, rename = "repo", alias = "repository")]
    pub repository: Option<TriggerRepository>,
    #[serde(default)]
    pub deployment: Option<TriggerDeployment>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerRepository {
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriggerDeployment {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub environment: Option<String>,
    /// Team payload, either inline JSON or a string holding JSON. Kept as
    /// text so resource manifests are never re-encoded.
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

/// A trigger as it reaches the dispatcher: the raw webhook body, the team
/// that claims to have sent it, and that team's hex signature over the body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSubmission {
    pub team: String,
    pub delivery_id: String,
    pub signature: String,
    pub body: String,
}

fn decode_payload(raw: Option<&RawValue>) -> Result<PayloadSpec, ValidationError> {
    let invalid = |e: serde_json::Error| ValidationError::InvalidPayload(e.to_string());
    let raw = raw
        .ok_or_else(|| ValidationError::InvalidPayload("payload is missing".to_string()))?;
    let payload: PayloadSpec = match serde_json::from_str::<String>(raw.get()) {
        Ok(inner) => serde_json::from_str(&inner).map_err(invalid)?,
        Err(_) => serde_json::from_str(raw.get()).map_err(invalid)?,
    };
    if payload.team.is_empty() {
        return Err(ValidationError::InvalidPayload(
            "team is not specified".to_string(),
        ));
    }
    Ok(payload)
}

/// Build a request valid from `now` for `ttl`.
///
/// [`BuildError::Invalid`] blames the trigger; [`BuildError::Request`] means
/// `now + ttl` has no representation.
pub fn build_request(
    event: &TriggerEvent,
    delivery_id: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<DeploymentRequest, BuildError> {
    let full_name = event
        .repository
        .as_ref()
        .and_then(|r| r.full_name.as_deref())
        .filter(|n| !n.is_empty())
        .ok_or(ValidationError::NoRepository)?;
    let repository = Repository::from_full_name(full_name).map_err(ValidationError::from)?;

    let deployment = event
        .deployment
        .as_ref()
        .ok_or(ValidationError::EmptyDeployment)?;

    let cluster = deployment
        .environment
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or(ValidationError::NoEnvironment)?;

    let payload = decode_payload(deployment.payload.as_deref())?;

    Ok(DeploymentRequest::try_new(
        repository,
        deployment.id.unwrap_or_default(),
        payload,
        cluster,
        delivery_id,
        now,
        ttl,
    )?)
}
