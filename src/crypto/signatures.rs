//! Cryptographic integrity primitives for the audit chain: canonical
//! content hashing, chain hashing, and secp256k1 ECDSA signatures over
//! SHA-256.

use std::sync::RwLock;

use secp256k1::{ecdsa::Signature, All, Message, Secp256k1, SecretKey};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::key_management::{PublicKeyRecord, SigningKeyRing};
use crate::error::{AuditError, Result};

/// Signature over a chain hash, tagged with the key that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSignature {
    pub signature: String,
    pub key_id: String,
}

/// Render any serializable value as canonical JSON: object keys sorted at
/// every depth, no insignificant whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonicalize(value))?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        scalar => scalar,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub struct CryptographicIntegrityManager {
    secp: Secp256k1<All>,
    keys: RwLock<SigningKeyRing>,
}

impl CryptographicIntegrityManager {
    pub fn new(keys: SigningKeyRing) -> Self {
        Self {
            secp: Secp256k1::new(),
            keys: RwLock::new(keys),
        }
    }

    /// Manager with a freshly generated, unpersisted key
    pub fn ephemeral() -> Self {
        Self::new(SigningKeyRing::generate_ephemeral())
    }

    /// 256-bit digest over the canonical serialization of a payload
    pub fn content_hash<T: Serialize>(&self, event: &T) -> Result<String> {
        let canonical = canonical_json(event)?;
        Ok(sha256_hex(canonical.as_bytes()))
    }

    /// 256-bit digest over `previous || content`
    pub fn chain_hash(&self, previous_hash: &str, content_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous_hash.as_bytes());
        hasher.update(content_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Sign a chain hash with the active key
    pub fn sign(&self, chain_hash: &str) -> Result<ChainSignature> {
        let message = Self::message_for(chain_hash)?;
        let keys = self
            .keys
            .read()
            .map_err(|_| AuditError::Crypto("Signing key ring lock poisoned".to_string()))?;

        let signature = self.secp.sign_ecdsa(&message, keys.active_secret());
        Ok(ChainSignature {
            signature: hex::encode(signature.serialize_compact()),
            key_id: keys.active_key_id().to_string(),
        })
    }

    /// Verify a signature made by the given key. Never fails: malformed
    /// input, an unknown key, or a mismatch all yield `false`.
    pub fn verify(&self, chain_hash: &str, signature_hex: &str, key_id: &str) -> bool {
        let Ok(message) = Self::message_for(chain_hash) else {
            return false;
        };
        let Ok(bytes) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(signature) = Signature::from_compact(&bytes) else {
            return false;
        };
        let Ok(keys) = self.keys.read() else {
            return false;
        };
        let Some(public_key) = keys.public_key(key_id) else {
            debug!("Signature made by unknown key {}", key_id);
            return false;
        };

        self.secp
            .verify_ecdsa(&message, &signature, public_key)
            .is_ok()
    }

    /// Activate a new signing key; the old public key stays available for
    /// verification.
    pub fn rotate_signing_key(&self, new_secret: SecretKey) -> Result<String> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| AuditError::Crypto("Signing key ring lock poisoned".to_string()))?;
        Ok(keys.rotate(new_secret))
    }

    pub fn active_key_id(&self) -> Result<String> {
        let keys = self
            .keys
            .read()
            .map_err(|_| AuditError::Crypto("Signing key ring lock poisoned".to_string()))?;
        Ok(keys.active_key_id().to_string())
    }

    pub fn export_public_keys(&self) -> Result<Vec<PublicKeyRecord>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| AuditError::Crypto("Signing key ring lock poisoned".to_string()))?;
        Ok(keys.export_public_keys())
    }

    fn message_for(chain_hash: &str) -> Result<Message> {
        let digest = Sha256::digest(chain_hash.as_bytes());
        Message::from_digest_slice(&digest)
            .map_err(|e| AuditError::Crypto(format!("Invalid message hash: {}", e)))
    }
}

impl Default for CryptographicIntegrityManager {
    fn default() -> Self {
        Self::ephemeral()
    }
}
