//! Queryable in-memory record of received statuses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_deployment::{DeploymentState, DeploymentStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{StatusSink, StatusSinkError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusRecordId(pub Uuid);

impl StatusRecordId {
    /// Time-ordered (UUID v7).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for StatusRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatusRecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: StatusRecordId,
    pub received_at: DateTime<Utc>,
    pub status: DeploymentStatus,
}

#[derive(Clone, Debug, Default)]
pub struct StatusFilter {
    pub delivery_id: Option<String>,
    pub state: Option<DeploymentState>,
    pub team: Option<String>,
    pub cluster: Option<String>,
    /// Maximum number of results to return
    pub limit: Option<usize>,
}

impl StatusFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivery_id(mut self, delivery_id: impl Into<String>) -> Self {
        self.delivery_id = Some(delivery_id.into());
        self
    }

    pub fn state(mut self, state: DeploymentState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, status: &DeploymentStatus) -> bool {
        self.delivery_id
            .as_deref()
            .map_or(true, |d| d == status.delivery_id)
            && self.state.map_or(true, |s| s == status.state)
            && self.team.as_deref().map_or(true, |t| t == status.team)
            && self.cluster.as_deref().map_or(true, |c| c == status.cluster)
    }
}

pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// The most recent statuses delivered to it, in arrival order. Once full, the
/// oldest record is evicted for each new one.
pub struct MemoryStatusLog {
    records: RwLock<VecDeque<StatusRecord>>,
    capacity: usize,
}

impl Default for MemoryStatusLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl MemoryStatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, status: DeploymentStatus) -> StatusRecordId {
        let id = StatusRecordId::new();
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(StatusRecord {
            id,
            received_at: Utc::now(),
            status,
        });
        id
    }

    /// Matching records, oldest first, truncated to the filter's limit.
    pub async fn query(&self, filter: &StatusFilter) -> Vec<StatusRecord> {
        let records = self.records.read().await;
        let matching = records.iter().filter(|r| filter.matches(&r.status)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub async fn get(&self, id: StatusRecordId) -> Result<StatusRecord, StatusSinkError> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StatusSinkError::NotFound(id))
    }

    pub async fn count(&self, filter: &StatusFilter) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.status))
            .count()
    }

    /// Most recent status for a delivery, if any arrived.
    pub async fn latest(&self, delivery_id: &str) -> Option<DeploymentStatus> {
        self.records
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.status.delivery_id == delivery_id)
            .map(|r| r.status.clone())
    }
}

#[async_trait]
impl StatusSink for MemoryStatusLog {
    async fn deliver(&self, status: DeploymentStatus) -> Result<(), StatusSinkError> {
        self.record(status).await;
        Ok(())
    }
}
