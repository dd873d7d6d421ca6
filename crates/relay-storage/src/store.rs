//! The KeyStore trait that backends implement.

use crate::types::*;
use crate::StoreError;
use relay_crypto::SecretKey;

/// Persistent home of every team's API keys.
///
/// Keys are returned newest first. Implementations must make [`KeyStore::rotate`]
/// atomic with respect to concurrent reads of the same team: a reader sees the
/// key set either before or after the rotation, never in between.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    /// All keys of a team, newest first. `NotFound` if the team has none.
    async fn read_by_team(&self, team: &Team) -> Result<Vec<ApiKey>, StoreError>;

    /// All keys owned by an authorization group, across teams. May be empty.
    async fn read_by_group(&self, group: &GroupId) -> Result<Vec<ApiKey>, StoreError>;

    /// Create the first key of a team. `AlreadyExists` if the team has keys.
    async fn write_initial(
        &self,
        team: &Team,
        group: &GroupId,
        secret: &SecretKey,
    ) -> Result<ApiKey, StoreError>;

    /// Add a new key for an existing team. Older keys stay valid until purged.
    /// `NotFound` if the team has no keys yet.
    async fn rotate(
        &self,
        team: &Team,
        group: &GroupId,
        new_secret: &SecretKey,
    ) -> Result<ApiKey, StoreError>;

    /// Drop every key of a team except the newest. Returns how many were removed.
    async fn purge(&self, team: &Team) -> Result<usize, StoreError>;
}
