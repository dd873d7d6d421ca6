//! In-memory key store.
//!
//! Suitable for:
//! - Tests and local development
//! - A single dispatcher process sharing the store with in-process agents
//!
//! Each team's key list sits behind its own reader/writer lock, so rotating
//! one team never waits on readers of another.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_crypto::SecretKey;
use relay_storage::{ApiKey, GroupId, KeyStore, StoreError, Team};
use std::sync::Arc;
use tokio::sync::RwLock;

type TeamKeys = Arc<RwLock<Vec<ApiKey>>>;

#[derive(Default)]
pub struct MemoryKeyStore {
    teams: DashMap<Team, TeamKeys>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn team_keys(&self, team: &Team) -> Option<TeamKeys> {
        self.teams.get(team).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn read_by_team(&self, team: &Team) -> Result<Vec<ApiKey>, StoreError> {
        let keys = self.team_keys(team).ok_or(StoreError::NotFound)?;
        let keys = keys.read().await;
        if keys.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(keys.clone())
    }

    async fn read_by_group(&self, group: &GroupId) -> Result<Vec<ApiKey>, StoreError> {
        // Snapshot the handles first; no map guard may be held across an await.
        let all: Vec<TeamKeys> = self.teams.iter().map(|e| e.value().clone()).collect();

        let mut out = Vec::new();
        for keys in all {
            let keys = keys.read().await;
            out.extend(keys.iter().filter(|k| &k.group_id == group).cloned());
        }
        out.sort_by(|a, b| a.team.cmp(&b.team));
        Ok(out)
    }

    async fn write_initial(
        &self,
        team: &Team,
        group: &GroupId,
        secret: &SecretKey,
    ) -> Result<ApiKey, StoreError> {
        let key = ApiKey::new(team.clone(), group.clone(), secret.clone());
        match self.teams.entry(team.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(vec![key.clone()])));
                Ok(key)
            }
        }
    }

    async fn rotate(
        &self,
        team: &Team,
        group: &GroupId,
        new_secret: &SecretKey,
    ) -> Result<ApiKey, StoreError> {
        let keys = self.team_keys(team).ok_or(StoreError::NotFound)?;
        let mut keys = keys.write().await;
        if keys.is_empty() {
            return Err(StoreError::NotFound);
        }

        let key = ApiKey::new(team.clone(), group.clone(), new_secret.clone());
        keys.insert(0, key.clone());
        Ok(key)
    }

    async fn purge(&self, team: &Team) -> Result<usize, StoreError> {
        let keys = self.team_keys(team).ok_or(StoreError::NotFound)?;
        let mut keys = keys.write().await;
        if keys.is_empty() {
            return Err(StoreError::NotFound);
        }

        let removed = keys.len() - 1;
        keys.truncate(1);
        Ok(removed)
    }
}
