use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PayloadSpec;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("invalid full name {0:?}: expected \"owner/name\"")]
    InvalidFullName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("deadline out of range: timestamp {timestamp} plus ttl {ttl_seconds}s")]
    DeadlineOutOfRange { timestamp: i64, ttl_seconds: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Split `"owner/name"`. Both halves must be non-empty.
    pub fn from_full_name(full_name: &str) -> Result<Self, RepositoryError> {
        match full_name.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(RepositoryError::InvalidFullName(full_name.to_string())),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A signed unit of work addressed to one cluster.
///
/// `timestamp` and `deadline` are unix seconds and `deadline >= timestamp`
/// holds for every request built with [`DeploymentRequest::new`] or
/// [`DeploymentRequest::try_new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub repository: Repository,
    pub deployment_id: i64,
    pub payload_spec: PayloadSpec,
    pub cluster: String,
    pub delivery_id: String,
    pub timestamp: i64,
    pub deadline: i64,
}

impl DeploymentRequest {
    /// Stamp a new request at `now`, valid for `ttl`. Negative TTLs are clamped to zero.
    ///
    /// Fails when `now + ttl` is not a representable instant.
    pub fn try_new(
        repository: Repository,
        deployment_id: i64,
        payload_spec: PayloadSpec,
        cluster: impl Into<String>,
        delivery_id: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, RequestError> {
        let ttl = ttl.max(Duration::zero());
        let deadline = now
            .checked_add_signed(ttl)
            .ok_or(RequestError::DeadlineOutOfRange {
                timestamp: now.timestamp(),
                ttl_seconds: ttl.num_seconds(),
            })?;
        Ok(Self {
            repository,
            deployment_id,
            payload_spec,
            cluster: cluster.into(),
            delivery_id: delivery_id.into(),
            timestamp: now.timestamp(),
            deadline: deadline.timestamp(),
        })
    }

    /// Like [`DeploymentRequest::try_new`], but an unrepresentable deadline
    /// saturates to the latest representable instant.
    pub fn new(
        repository: Repository,
        deployment_id: i64,
        payload_spec: PayloadSpec,
        cluster: impl Into<String>,
        delivery_id: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = ttl.max(Duration::zero());
        let deadline = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            repository,
            deployment_id,
            payload_spec,
            cluster: cluster.into(),
            delivery_id: delivery_id.into(),
            timestamp: now.timestamp(),
            deadline: deadline.timestamp(),
        }
    }

    pub fn team(&self) -> &str {
        &self.payload_spec.team
    }

    /// The deadline as an instant. Out-of-range values collapse to the earliest
    /// representable instant, which makes such a request stale.
    pub fn deadline_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.deadline, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Span carrying the fields every log line about this request should have.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "deployment",
            delivery_id = %self.delivery_id,
            cluster = %self.cluster,
            repository = %self.repository,
            deployment_id = self.deployment_id,
            team = %self.payload_spec.team,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn full_name_splits_owner_and_name() {
        let repo = Repository::from_full_name("org/app").unwrap();
        assert_eq!(repo, Repository::new("org", "app"));
        assert_eq!(repo.to_string(), "org/app");
        assert_eq!(repo.full_name(), "org/app");
    }

    #[test]
    fn full_name_rejects_malformed_input() {
        for bad in ["", "org", "/app", "org/", "a/b/c"] {
            assert!(
                Repository::from_full_name(bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn deadline_is_timestamp_plus_ttl() {
        let req = DeploymentRequest::new(
            Repository::new("org", "app"),
            7,
            PayloadSpec::new("aura", vec![]),
            "dev",
            "delivery-1",
            at(1_000),
            Duration::seconds(60),
        );
        assert_eq!(req.timestamp, 1_000);
        assert_eq!(req.deadline, 1_060);
        assert_eq!(req.deadline_at(), at(1_060));
        assert_eq!(req.team(), "aura");
    }

    #[test]
    fn negative_ttl_never_puts_deadline_before_timestamp() {
        let req = DeploymentRequest::new(
            Repository::new("org", "app"),
            7,
            PayloadSpec::new("aura", vec![]),
            "dev",
            "delivery-1",
            at(1_000),
            Duration::seconds(-5),
        );
        assert_eq!(req.deadline, req.timestamp);
    }

    #[test]
    fn unrepresentable_deadline_is_an_error_not_a_panic() {
        let build = |ttl| {
            DeploymentRequest::try_new(
                Repository::new("org", "app"),
                7,
                PayloadSpec::new("aura", vec![]),
                "dev",
                "delivery-1",
                at(1_000),
                ttl,
            )
        };

        let err = build(Duration::MAX).unwrap_err();
        assert!(matches!(err, RequestError::DeadlineOutOfRange { timestamp: 1_000, .. }));
        assert_eq!(build(Duration::seconds(60)).unwrap().deadline, 1_060);
    }

    #[test]
    fn new_saturates_an_unrepresentable_deadline() {
        let req = DeploymentRequest::new(
            Repository::new("org", "app"),
            7,
            PayloadSpec::new("aura", vec![]),
            "dev",
            "delivery-1",
            at(1_000),
            Duration::MAX,
        );
        assert_eq!(req.deadline, DateTime::<Utc>::MAX_UTC.timestamp());
        assert!(req.deadline >= req.timestamp);
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let req = DeploymentRequest::new(
            Repository::new("org", "app"),
            7,
            PayloadSpec::new("aura", vec![]),
            "dev",
            "delivery-1",
            at(1_000),
            Duration::seconds(60),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["deploymentId"], 7);
        assert_eq!(json["deliveryId"], "delivery-1");
        assert_eq!(json["payloadSpec"]["team"], "aura");
        assert_eq!(json["repository"]["owner"], "org");
    }
}
