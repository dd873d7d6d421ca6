//! Authorization boundary in front of the key store.
//!
//! Callers are identified only by the authorization groups they present. A
//! key is visible to a caller when its group is one of theirs.

use relay_crypto::{generate_key, KEY_LEN};
use relay_storage::{ApiKey, GroupId, KeyStore, StoreError, Team, TeamMembership};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum KeyAccessError {
    #[error("team not found")]
    NotFound,
    #[error("team already has keys")]
    AlreadyExists,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("key store: {0}")]
    Store(StoreError),
}

impl From<StoreError> for KeyAccessError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => KeyAccessError::NotFound,
            StoreError::AlreadyExists => KeyAccessError::AlreadyExists,
            other => KeyAccessError::Store(other),
        }
    }
}

/// The caller's authorization groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Groups(BTreeSet<GroupId>);

impl Groups {
    pub fn contains(&self, group: &GroupId) -> bool {
        self.0.contains(group)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupId> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Groups {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|g| GroupId(g.into())).collect())
    }
}

pub struct ApiKeyService {
    store: Arc<dyn KeyStore>,
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Every key owned by any of the caller's groups.
    pub async fn visible_keys(&self, groups: &Groups) -> Result<Vec<ApiKey>, KeyAccessError> {
        let mut keys = Vec::new();
        for group in groups.iter() {
            keys.extend(self.store.read_by_group(group).await?);
        }
        Ok(keys)
    }

    /// Newest-first keys of `team` visible to the caller, at most `limit` of them.
    pub async fn team_keys(
        &self,
        team: &Team,
        groups: &Groups,
        limit: Option<usize>,
    ) -> Result<Vec<ApiKey>, KeyAccessError> {
        let mut keys: Vec<ApiKey> = self
            .store
            .read_by_team(team)
            .await?
            .into_iter()
            .filter(|k| groups.contains(&k.group_id))
            .collect();

        if keys.is_empty() {
            return Err(KeyAccessError::Forbidden(
                "not authorized to view this team's keys",
            ));
        }
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    /// Create the first key of a new team, owned by `group`.
    pub async fn create_team(&self, team: &Team, group: &GroupId) -> Result<ApiKey, KeyAccessError> {
        let key = self
            .store
            .write_initial(team, group, &generate_key(KEY_LEN))
            .await?;
        info!(%team, %group, "team key created");
        Ok(key)
    }

    /// Add a fresh key for `team` under the group the caller shares with it.
    ///
    /// Returns the team's keys as visible to the caller afterwards. Previous
    /// keys keep working until [`ApiKeyService::purge_team_keys`].
    pub async fn rotate_team_key(
        &self,
        team: &Team,
        groups: &Groups,
    ) -> Result<Vec<ApiKey>, KeyAccessError> {
        let group = self.shared_group(team, groups, "not allowed to rotate key").await?;

        self.store
            .rotate(team, &group, &generate_key(KEY_LEN))
            .await?;
        info!(%team, %group, "team key rotated");

        self.team_keys(team, groups, None).await
    }

    /// End the rotation window: keep only the newest key.
    pub async fn purge_team_keys(
        &self,
        team: &Team,
        groups: &Groups,
    ) -> Result<usize, KeyAccessError> {
        self.shared_group(team, groups, "not allowed to purge keys").await?;
        let removed = self.store.purge(team).await?;
        info!(%team, removed, "old team keys purged");
        Ok(removed)
    }

    /// Teams the caller can see, each with its owning group, sorted by team.
    pub async fn teams(&self, groups: &Groups) -> Result<Vec<TeamMembership>, KeyAccessError> {
        let mut seen = BTreeMap::new();
        for key in self.visible_keys(groups).await? {
            let membership = TeamMembership::from(&key);
            seen.insert(
                (membership.team.clone(), membership.group_id.clone()),
                membership,
            );
        }
        Ok(seen.into_values().collect())
    }

    /// Group of the newest key the caller can see.
    async fn shared_group(
        &self,
        team: &Team,
        groups: &Groups,
        denied: &'static str,
    ) -> Result<GroupId, KeyAccessError> {
        let keys = self.store.read_by_team(team).await?;
        keys.into_iter()
            .map(|k| k.group_id)
            .find(|g| groups.contains(g))
            .ok_or(KeyAccessError::Forbidden(denied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_crypto::SecretKey;
    use relay_storage::MockKeyStore;

    fn key(team: &str, group: &str) -> ApiKey {
        ApiKey::new(Team::new(team), GroupId::new(group), generate_key(KEY_LEN))
    }

    fn groups(names: &[&str]) -> Groups {
        names.iter().copied().collect()
    }

    #[tokio::test]
    async fn team_keys_not_found_is_distinct_from_forbidden() {
        let mut store = MockKeyStore::new();
        store
            .expect_read_by_team()
            .returning(|_| Err(StoreError::NotFound));

        let svc = ApiKeyService::new(Arc::new(store));
        let err = svc
            .team_keys(&Team::new("ghost"), &groups(&["g1"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyAccessError::NotFound));
    }

    #[tokio::test]
    async fn team_keys_forbidden_for_foreign_groups() {
        let keys = vec![key("aura", "g-aura")];
        let mut store = MockKeyStore::new();
        store
            .expect_read_by_team()
            .returning(move |_| Ok(keys.clone()));

        let svc = ApiKeyService::new(Arc::new(store));
        let err = svc
            .team_keys(&Team::new("aura"), &groups(&["g-other"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyAccessError::Forbidden(_)));
        assert_eq!(err.to_string(), "not authorized to view this team's keys");
    }

    #[tokio::test]
    async fn team_keys_respects_limit() {
        let keys = vec![key("aura", "g"), key("aura", "g"), key("aura", "g")];
        let newest = keys[0].key.clone();
        let mut store = MockKeyStore::new();
        store
            .expect_read_by_team()
            .returning(move |_| Ok(keys.clone()));

        let svc = ApiKeyService::new(Arc::new(store));
        let got = svc
            .team_keys(&Team::new("aura"), &groups(&["g"]), Some(1))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key, newest);
    }

    #[tokio::test]
    async fn rotate_forbidden_never_touches_store() {
        let keys = vec![key("aura", "g-aura")];
        let mut store = MockKeyStore::new();
        store
            .expect_read_by_team()
            .returning(move |_| Ok(keys.clone()));
        store.expect_rotate().never();

        let svc = ApiKeyService::new(Arc::new(store));
        let err = svc
            .rotate_team_key(&Team::new("aura"), &groups(&["intruders"]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not allowed to rotate key");
    }

    #[tokio::test]
    async fn rotate_uses_shared_group_and_fresh_secret() {
        let existing = key("aura", "g-aura");
        let old_secret = existing.key.clone();
        let mut store = MockKeyStore::new();
        store
            .expect_read_by_team()
            .returning(move |_| Ok(vec![existing.clone()]));
        store
            .expect_rotate()
            .withf(move |team, group, secret: &SecretKey| {
                team.as_str() == "aura" && group.as_str() == "g-aura" && *secret != old_secret
            })
            .times(1)
            .returning(|team, group, secret| {
                Ok(ApiKey::new(team.clone(), group.clone(), secret.clone()))
            });

        let svc = ApiKeyService::new(Arc::new(store));
        svc.rotate_team_key(&Team::new("aura"), &groups(&["g-aura", "g-x"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn backend_errors_surface_as_store_errors() {
        let mut store = MockKeyStore::new();
        store
            .expect_read_by_group()
            .returning(|_| Err(StoreError::Backend("disk".into())));

        let svc = ApiKeyService::new(Arc::new(store));
        let err = svc.visible_keys(&groups(&["g"])).await.unwrap_err();
        assert!(matches!(err, KeyAccessError::Store(_)));
    }

    #[tokio::test]
    async fn teams_are_deduplicated_and_sorted() {
        let mut store = MockKeyStore::new();
        store.expect_read_by_group().returning(|group| {
            Ok(match group.as_str() {
                "g1" => vec![key("zeta", "g1"), key("zeta", "g1"), key("alpha", "g1")],
                _ => vec![key("mid", "g2")],
            })
        });

        let svc = ApiKeyService::new(Arc::new(store));
        let teams: Vec<_> = svc
            .teams(&groups(&["g1", "g2"]))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.team.as_str().to_string())
            .collect();
        assert_eq!(teams, vec!["alpha", "mid", "zeta"]);
    }
}
