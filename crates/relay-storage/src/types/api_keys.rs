//! API key records.

use chrono::{DateTime, Utc};
use relay_crypto::SecretKey;
use serde::{Deserialize, Serialize};

use super::{GroupId, Team};

/// A team's shared secret, bound to the authorization group allowed to manage it.
///
/// A team accumulates keys over time: rotation adds a new key and leaves the
/// previous ones valid until they are purged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub team: Team,
    pub group_id: GroupId,
    pub key: SecretKey,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn new(team: Team, group_id: GroupId, key: SecretKey) -> Self {
        Self {
            team,
            group_id,
            key,
            created_at: Utc::now(),
        }
    }
}

/// Team and the group that owns it, without key material.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMembership {
    pub team: Team,
    pub group_id: GroupId,
}

impl From<&ApiKey> for TeamMembership {
    fn from(key: &ApiKey) -> Self {
        Self {
            team: key.team.clone(),
            group_id: key.group_id.clone(),
        }
    }
}
