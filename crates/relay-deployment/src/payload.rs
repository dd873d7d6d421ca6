use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("kubernetes section must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("kubernetes.resources must be an array")]
    ResourcesNotAnArray,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One resource manifest exactly as the trigger supplied it.
///
/// The bytes are not interpreted here; decoding is the cluster client's job so
/// that a malformed manifest is reported against its own position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawManifest(Vec<u8>);

impl RawManifest {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Team-specific part of a deployment, decoded from the trigger's payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSpec {
    #[serde(default)]
    pub version: Vec<u32>,
    pub team: String,
    /// `{"resources": [...]}`, carried as the original JSON text so each
    /// manifest reaches the cluster byte for byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<Box<RawValue>>,
}

impl PartialEq for PayloadSpec {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.team == other.team
            && self.kubernetes.as_deref().map(RawValue::get)
                == other.kubernetes.as_deref().map(RawValue::get)
    }
}

#[derive(Deserialize)]
struct KubernetesSection {
    #[serde(default)]
    resources: Option<Box<RawValue>>,
}

impl PayloadSpec {
    pub fn new(team: impl Into<String>, resources: Vec<serde_json::Value>) -> Self {
        // A Value always serializes.
        let kubernetes =
            serde_json::value::to_raw_value(&serde_json::json!({ "resources": resources })).ok();
        Self {
            version: Vec::new(),
            team: team.into(),
            kubernetes,
        }
    }

    /// Ordered resource manifests. A missing section means no resources.
    pub fn resources(&self) -> Result<Vec<RawManifest>, PayloadError> {
        let Some(section) = self.kubernetes.as_deref() else {
            return Ok(Vec::new());
        };
        match json_kind(section) {
            "null" => return Ok(Vec::new()),
            "object" => {}
            other => return Err(PayloadError::NotAnObject(other)),
        }

        let section: KubernetesSection = serde_json::from_str(section.get())?;
        let resources = match section.resources.as_deref() {
            None => return Ok(Vec::new()),
            Some(raw) => match json_kind(raw) {
                "null" => return Ok(Vec::new()),
                "array" => raw,
                _ => return Err(PayloadError::ResourcesNotAnArray),
            },
        };

        let resources: Vec<Box<RawValue>> = serde_json::from_str(resources.get())?;
        Ok(resources
            .iter()
            .map(|r| RawManifest::new(r.get().as_bytes()))
            .collect())
    }
}

/// Kind of an already-validated JSON value, read from its first byte.
fn json_kind(raw: &RawValue) -> &'static str {
    match raw.get().trim_start().as_bytes().first() {
        Some(b'n') => "null",
        Some(b't') | Some(b'f') => "bool",
        Some(b'"') => "string",
        Some(b'[') => "array",
        Some(b'{') => "object",
        _ => "number",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(json: &str) -> PayloadSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn resources_keep_order() {
        let spec = PayloadSpec::new(
            "aura",
            vec![json!({"kind": "Namespace"}), json!({"kind": "Deployment"})],
        );
        let resources = spec.resources().unwrap();
        assert_eq!(resources.len(), 2);

        let first: serde_json::Value = serde_json::from_slice(resources[0].as_bytes()).unwrap();
        let second: serde_json::Value = serde_json::from_slice(resources[1].as_bytes()).unwrap();
        assert_eq!(first["kind"], "Namespace");
        assert_eq!(second["kind"], "Deployment");
    }

    #[test]
    fn manifests_keep_their_original_text() {
        let manifest = r#"{"kind":"ConfigMap","data":{"big":123456789012345678901234567890,"ratio":1.10}}"#;
        let spec = spec(&format!(
            r#"{{"team":"aura","kubernetes":{{"resources":[{manifest}]}}}}"#
        ));

        let resources = spec.resources().unwrap();
        assert_eq!(resources, vec![RawManifest::new(manifest)]);
    }

    #[test]
    fn manifests_survive_a_serialization_round_trip() {
        let manifest = r#"{"kind":"ConfigMap","data":{"big":123456789012345678901234567890}}"#;
        let original = spec(&format!(
            r#"{{"team":"aura","kubernetes":{{"resources":[{manifest}]}}}}"#
        ));

        let decoded: PayloadSpec =
            serde_json::from_slice(&serde_json::to_vec(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.resources().unwrap(), vec![RawManifest::new(manifest)]);
    }

    #[test]
    fn missing_kubernetes_section_is_empty() {
        assert!(spec(r#"{"team": "aura"}"#).resources().unwrap().is_empty());
        assert!(spec(r#"{"team": "aura", "kubernetes": null}"#)
            .resources()
            .unwrap()
            .is_empty());
        assert!(spec(r#"{"team": "aura", "kubernetes": {}}"#)
            .resources()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_kubernetes_section_is_an_error() {
        assert!(matches!(
            spec(r#"{"team": "aura", "kubernetes": "nope"}"#).resources(),
            Err(PayloadError::NotAnObject("string"))
        ));
        assert!(matches!(
            spec(r#"{"team": "aura", "kubernetes": {"resources": {"kind": "Pod"}}}"#).resources(),
            Err(PayloadError::ResourcesNotAnArray)
        ));
    }

    #[test]
    fn payload_requires_team() {
        let result: Result<PayloadSpec, _> = serde_json::from_str(r#"{"kubernetes": {}}"#);
        assert!(result.is_err());
    }
}
