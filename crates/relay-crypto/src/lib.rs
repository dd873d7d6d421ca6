//! Message authentication for deployment requests.
//!
//! Tags are HMAC-SHA256 over the exact bytes that travel on the wire.
//! Comparison is constant-time and [`verify_any`] inspects every candidate
//! key before answering, so callers learn nothing about which key came close.

use hmac::{Hmac, Mac};
use rand_core::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of freshly generated team secrets, in bytes.
pub const KEY_LEN: usize = 32;

/// Length of an HMAC-SHA256 tag, in bytes.
pub const TAG_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("signature mismatch")]
    SignatureMismatch,
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("key must not be empty")]
    Empty,
}

/// Shared secret used to sign and verify messages.
///
/// The bytes are wiped on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, KeyError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self(Zeroizing::new(bytes)))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        Self::from_bytes(hex::decode(encoded.trim())?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_slice())
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for SecretKey {}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        SecretKey::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Generate a random secret of `len` bytes from the OS RNG.
pub fn generate_key(len: usize) -> SecretKey {
    let mut bytes = Zeroizing::new(vec![0u8; len.max(1)]);
    rand_core::OsRng.fill_bytes(bytes.as_mut_slice());
    SecretKey(bytes)
}

fn mac_for(key: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        // HMAC hashes long keys and pads short ones, so every length is accepted.
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    }
}

/// Compute the HMAC-SHA256 tag of `message` under `key`.
pub fn sign(message: &[u8], key: &[u8]) -> Vec<u8> {
    let mut mac = mac_for(key);
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn tag_matches(message: &[u8], tag: &[u8], key: &[u8]) -> Choice {
    let expected = sign(message, key);
    expected.as_slice().ct_eq(tag)
}

/// Report whether `tag` is a valid tag for `message` under `key`.
pub fn verify(message: &[u8], tag: &[u8], key: &[u8]) -> bool {
    tag_matches(message, tag, key).into()
}

/// Succeed if any candidate key validates `tag`.
///
/// All candidates are checked even after a match so that timing does not
/// reveal the position of the matching key.
pub fn verify_any<'a, I>(message: &[u8], tag: &[u8], candidates: I) -> Result<(), AuthError>
where
    I: IntoIterator<Item = &'a SecretKey>,
{
    let mut matched = Choice::from(0u8);
    for key in candidates {
        matched |= tag_matches(message, tag, key.as_bytes());
    }

    if bool::from(matched) {
        Ok(())
    } else {
        Err(AuthError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_matches_rfc4231_vector() {
        // RFC 4231, test case 2
        let tag = sign(b"what do ya want for nothing?", b"Jefe");
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn sign_is_deterministic() {
        let key = generate_key(KEY_LEN);
        let a = sign(b"payload", key.as_bytes());
        let b = sign(b"payload", key.as_bytes());
        assert_eq!(a, b);
        assert_eq!(a.len(), TAG_LEN);
    }

    #[test]
    fn verify_rejects_tampered_message_and_tag() {
        let key = generate_key(KEY_LEN);
        let mut tag = sign(b"payload", key.as_bytes());

        assert!(verify(b"payload", &tag, key.as_bytes()));
        assert!(!verify(b"payloae", &tag, key.as_bytes()));

        tag[0] ^= 0x01;
        assert!(!verify(b"payload", &tag, key.as_bytes()));
    }

    #[test]
    fn verify_rejects_truncated_tag() {
        let key = generate_key(KEY_LEN);
        let tag = sign(b"payload", key.as_bytes());
        assert!(!verify(b"payload", &tag[..16], key.as_bytes()));
        assert!(!verify(b"payload", &[], key.as_bytes()));
    }

    #[test]
    fn verify_any_accepts_old_and_new_keys() {
        let old = generate_key(KEY_LEN);
        let new = generate_key(KEY_LEN);
        let candidates = vec![new.clone(), old.clone()];

        let signed_old = sign(b"msg", old.as_bytes());
        let signed_new = sign(b"msg", new.as_bytes());

        assert!(verify_any(b"msg", &signed_old, &candidates).is_ok());
        assert!(verify_any(b"msg", &signed_new, &candidates).is_ok());
    }

    #[test]
    fn verify_any_fails_for_unknown_key() {
        let known = generate_key(KEY_LEN);
        let unknown = generate_key(KEY_LEN);
        let tag = sign(b"msg", unknown.as_bytes());

        let err = verify_any(b"msg", &tag, [&known]).unwrap_err();
        assert_eq!(err, AuthError::SignatureMismatch);
        assert_eq!(err.to_string(), "signature mismatch");
    }

    #[test]
    fn verify_any_with_no_candidates_fails() {
        let key = generate_key(KEY_LEN);
        let tag = sign(b"msg", key.as_bytes());
        let none: Vec<SecretKey> = Vec::new();
        assert!(verify_any(b"msg", &tag, &none).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        let a = generate_key(KEY_LEN);
        let b = generate_key(KEY_LEN);
        assert_eq!(a.as_bytes().len(), KEY_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn secret_key_hex_roundtrip() {
        let key = generate_key(KEY_LEN);
        let parsed = SecretKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);

        assert!(SecretKey::from_hex("zz").is_err());
        assert!(matches!(SecretKey::from_hex(""), Err(KeyError::Empty)));
    }

    #[test]
    fn secret_key_debug_is_redacted() {
        let key = SecretKey::from_bytes(b"topsecret".to_vec()).unwrap();
        let debug = format!("{:?}", key);
        assert!(!debug.contains("topsecret"));
        assert!(!debug.contains(&key.to_hex()));
    }

    #[test]
    fn secret_key_serializes_as_hex() {
        let key = SecretKey::from_bytes(vec![0xde, 0xad]).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"dead\"");
        let back: SecretKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
