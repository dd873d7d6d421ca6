//! Signed wire form of a deployment request.
//!
//! The payload travels as base64 of the exact serialized request bytes and the
//! signature is the hex HMAC over those bytes. Verification always runs on the
//! decoded bytes before any attempt to parse them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use relay_crypto::{AuthError, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DeploymentRequest;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("decoding deployment request: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("encoding deployment request: {0}")]
    Encode(#[source] serde_json::Error),
}

impl EnvelopeError {
    pub fn is_auth(&self) -> bool {
        matches!(self, EnvelopeError::Auth(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: String,
    pub signature: String,
}

impl Envelope {
    /// Serialize `req` and sign the resulting bytes with `key`.
    pub fn wrap(req: &DeploymentRequest, key: &SecretKey) -> Result<Self, EnvelopeError> {
        let bytes = serde_json::to_vec(req).map_err(EnvelopeError::Encode)?;
        let tag = relay_crypto::sign(&bytes, key.as_bytes());
        Ok(Self {
            payload: STANDARD.encode(&bytes),
            signature: hex::encode(tag),
        })
    }

    /// Check the signature against every candidate, then decode.
    ///
    /// An undecodable signature is reported as a mismatch, like any other bad tag.
    pub fn unwrap<'a, I>(&self, candidates: I) -> Result<DeploymentRequest, EnvelopeError>
    where
        I: IntoIterator<Item = &'a SecretKey>,
    {
        let bytes = STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| EnvelopeError::Malformed(format!("payload: {e}")))?;
        let tag = hex::decode(self.signature.trim()).unwrap_or_default();

        relay_crypto::verify_any(&bytes, &tag, candidates)?;

        serde_json::from_slice(&bytes).map_err(EnvelopeError::Decode)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}
