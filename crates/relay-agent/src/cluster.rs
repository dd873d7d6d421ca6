//! Contract with the cluster API.

use async_trait::async_trait;
use relay_deployment::RawManifest;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("while decoding payload: {0}")]
    Decode(String),
    #[error("{0}")]
    Apply(String),
    #[error("cluster client for team {team}: {reason}")]
    Client { team: String, reason: String },
    #[error("loading cluster config: {0}")]
    Config(String),
}

/// Canonical reference to an object the cluster accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedObject {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for AppliedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.api_version, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// A manifest parsed far enough to know where it goes. `object` keeps the
/// manifest's original text for the apply body.
#[derive(Clone, Debug)]
pub struct DecodedManifest {
    pub reference: AppliedObject,
    pub object: Box<RawValue>,
}

#[derive(Deserialize)]
struct ManifestHeader {
    #[serde(default, rename = "apiVersion")]
    api_version: Option<serde_json::Value>,
    #[serde(default)]
    kind: Option<serde_json::Value>,
    #[serde(default)]
    metadata: Option<ManifestMetadata>,
}

#[derive(Deserialize)]
struct ManifestMetadata {
    #[serde(default)]
    name: Option<serde_json::Value>,
    #[serde(default)]
    namespace: Option<serde_json::Value>,
}

impl DecodedManifest {
    pub fn decode(manifest: &RawManifest) -> Result<Self, ClusterError> {
        let decode_err = |e: serde_json::Error| ClusterError::Decode(e.to_string());
        let object: Box<RawValue> = serde_json::from_slice(manifest.as_bytes()).map_err(decode_err)?;
        let header: ManifestHeader = serde_json::from_str(object.get()).map_err(decode_err)?;

        let text = |value: Option<&serde_json::Value>| {
            value
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let missing = |what: &str| ClusterError::Decode(format!("missing {what}"));
        let metadata = header.metadata.as_ref();

        let reference = AppliedObject {
            api_version: text(header.api_version.as_ref()).ok_or_else(|| missing("apiVersion"))?,
            kind: text(header.kind.as_ref()).ok_or_else(|| missing("kind"))?,
            namespace: text(metadata.and_then(|m| m.namespace.as_ref())),
            name: text(metadata.and_then(|m| m.name.as_ref()))
                .ok_or_else(|| missing("metadata.name"))?,
        };

        Ok(Self { reference, object })
    }
}

/// Applies single objects to one cluster. Applying the same object twice must
/// leave the cluster as if it had been applied once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Decode `manifest` and create or update the object it describes.
    async fn apply_unstructured(&self, manifest: &RawManifest) -> Result<AppliedObject, ClusterError>;
}

/// Hands out clients that act with a team's permissions.
#[async_trait]
pub trait ClusterClientProvider: Send + Sync {
    async fn client_for_team(&self, team: &str) -> Result<Arc<dyn ClusterClient>, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawManifest {
        RawManifest::new(serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn decode_namespaced_object() {
        let decoded = DecodedManifest::decode(&raw(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "app", "namespace": "aura"}
        })))
        .unwrap();

        assert_eq!(decoded.reference.kind, "Deployment");
        assert_eq!(decoded.reference.namespace.as_deref(), Some("aura"));
        assert_eq!(decoded.reference.to_string(), "apps/v1/Deployment aura/app");
    }

    #[test]
    fn decode_cluster_scoped_object() {
        let decoded = DecodedManifest::decode(&raw(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "aura"}
        })))
        .unwrap();
        assert_eq!(decoded.reference.namespace, None);
        assert_eq!(decoded.reference.to_string(), "v1/Namespace aura");
    }

    #[test]
    fn decode_rejects_incomplete_objects() {
        let err = DecodedManifest::decode(&raw(json!({"kind": "Pod", "metadata": {"name": "x"}})))
            .unwrap_err();
        assert_eq!(err.to_string(), "while decoding payload: missing apiVersion");

        let err = DecodedManifest::decode(&raw(json!({"apiVersion": "v1", "kind": "Pod"})))
            .unwrap_err();
        assert!(err.to_string().contains("metadata.name"));

        let err = DecodedManifest::decode(&RawManifest::new(b"{not json".to_vec())).unwrap_err();
        assert!(matches!(err, ClusterError::Decode(_)));
    }

    #[test]
    fn decode_keeps_the_original_text() {
        let text = r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"big"},"data":{"n":123456789012345678901234567890}}"#;
        let decoded = DecodedManifest::decode(&RawManifest::new(text)).unwrap();
        assert_eq!(decoded.object.get(), text);
        assert_eq!(decoded.reference.name, "big");
    }
}
