//! Signing Key Management
//!
//! Holds the active audit signing key together with every public key that
//! has ever signed chain entries, so historically-signed entries keep
//! verifying after a rotation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::SigningConfig;
use crate::error::{AuditError, Result};

/// Derive the short identifier recorded on every sealed entry
pub fn key_id_for(public_key: &PublicKey) -> String {
    let digest = Sha256::digest(public_key.serialize());
    hex::encode(&digest[..8])
}

/// Public half of a key known to the ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub key_id: String,
    pub public_key: String,
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
}

/// Active signing key plus retained verification keys
pub struct SigningKeyRing {
    active_id: String,
    active_secret: SecretKey,
    public_keys: HashMap<String, PublicKey>,
    activated_at: DateTime<Utc>,
}

impl SigningKeyRing {
    /// Build a ring around an externally provisioned secret key
    pub fn from_secret(secret: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &secret);
        let key_id = key_id_for(&public_key);

        let mut public_keys = HashMap::new();
        public_keys.insert(key_id.clone(), public_key);

        Self {
            active_id: key_id,
            active_secret: secret,
            public_keys,
            activated_at: Utc::now(),
        }
    }

    /// Parse a hex-encoded 32-byte secret key
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| AuditError::Crypto(format!("Invalid signing key hex: {}", e)))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| AuditError::Crypto(format!("Invalid signing key: {}", e)))?;
        Ok(Self::from_secret(secret))
    }

    /// Generate a process-local key. Entries it signs can only be verified
    /// later if its public key is exported and retained.
    pub fn generate_ephemeral() -> Self {
        let secret = SecretKey::new(&mut secp256k1::rand::thread_rng());
        Self::from_secret(secret)
    }

    /// Load the ring described by the signing configuration
    pub fn load(config: &SigningConfig) -> Result<Self> {
        let mut ring = if let Some(secret_hex) = &config.signing_key_hex {
            info!("Loading audit signing key from configuration");
            Self::from_secret_hex(secret_hex)?
        } else if let Some(path) = &config.signing_key_path {
            info!("Loading audit signing key from {}", path);
            Self::load_from_file(Path::new(path))?
        } else {
            warn!("No audit signing key provisioned; generating an ephemeral key");
            Self::generate_ephemeral()
        };

        for public_hex in &config.retired_public_keys {
            ring.retain_public_key_hex(public_hex)?;
        }

        info!(
            "Audit signing key ring ready: active {}, {} verification keys",
            ring.active_key_id(),
            ring.public_keys.len()
        );
        Ok(ring)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AuditError::Config(format!("Failed to read signing key {:?}: {}", path, e))
        })?;
        Self::from_secret_hex(&contents)
    }

    pub fn active_key_id(&self) -> &str {
        &self.active_id
    }

    pub fn active_secret(&self) -> &SecretKey {
        &self.active_secret
    }

    pub fn public_key(&self, key_id: &str) -> Option<&PublicKey> {
        self.public_keys.get(key_id)
    }

    /// Keep a retired public key so its historical signatures still verify
    pub fn retain_public_key_hex(&mut self, public_hex: &str) -> Result<String> {
        let bytes = hex::decode(public_hex.trim())
            .map_err(|e| AuditError::Crypto(format!("Invalid public key hex: {}", e)))?;
        let public_key = PublicKey::from_slice(&bytes)
            .map_err(|e| AuditError::Crypto(format!("Invalid public key: {}", e)))?;
        let key_id = key_id_for(&public_key);
        self.public_keys.insert(key_id.clone(), public_key);
        Ok(key_id)
    }

    /// Activate a new signing key, retaining the previous public key
    pub fn rotate(&mut self, new_secret: SecretKey) -> String {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &new_secret);
        let key_id = key_id_for(&public_key);

        info!("Rotating audit signing key {} -> {}", self.active_id, key_id);

        self.public_keys.insert(key_id.clone(), public_key);
        self.active_id = key_id.clone();
        self.active_secret = new_secret;
        self.activated_at = Utc::now();
        key_id
    }

    /// Export every retained public key for offline verification
    pub fn export_public_keys(&self) -> Vec<PublicKeyRecord> {
        let mut records: Vec<PublicKeyRecord> = self
            .public_keys
            .iter()
            .map(|(key_id, public_key)| {
                let active = *key_id == self.active_id;
                PublicKeyRecord {
                    key_id: key_id.clone(),
                    public_key: hex::encode(public_key.serialize()),
                    active,
                    activated_at: active.then_some(self.activated_at),
                }
            })
            .collect();
        records.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_key_id_is_stable() {
        let ring = SigningKeyRing::generate_ephemeral();
        let id = ring.active_key_id().to_string();
        assert_eq!(id.len(), 16);

        let secret_hex = hex::encode(ring.active_secret().secret_bytes());
        let reloaded = SigningKeyRing::from_secret_hex(&secret_hex).unwrap();
        assert_eq!(reloaded.active_key_id(), id);
    }

    #[test]
    fn test_rotation_retains_old_public_key() {
        let mut ring = SigningKeyRing::generate_ephemeral();
        let old_id = ring.active_key_id().to_string();

        let new_secret = SecretKey::new(&mut secp256k1::rand::thread_rng());
        let new_id = ring.rotate(new_secret);

        assert_ne!(old_id, new_id);
        assert_eq!(ring.active_key_id(), new_id);
        assert!(ring.public_key(&old_id).is_some());

        let exported = ring.export_public_keys();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported.iter().filter(|r| r.active).count(), 1);
    }

    #[test]
    fn test_load_from_file_and_retired_keys() {
        let provisioned = SigningKeyRing::generate_ephemeral();
        let retired = SigningKeyRing::generate_ephemeral();
        let retired_pub = retired.export_public_keys()[0].public_key.clone();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", hex::encode(provisioned.active_secret().secret_bytes())).unwrap();

        let config = SigningConfig {
            signing_key_path: Some(file.path().to_string_lossy().to_string()),
            signing_key_hex: None,
            retired_public_keys: vec![retired_pub],
        };
        let ring = SigningKeyRing::load(&config).unwrap();

        assert_eq!(ring.active_key_id(), provisioned.active_key_id());
        assert!(ring.public_key(retired.active_key_id()).is_some());
    }

    #[test]
    fn test_rejects_malformed_key_material() {
        assert!(SigningKeyRing::from_secret_hex("not-hex").is_err());
        assert!(SigningKeyRing::from_secret_hex("00").is_err());

        let mut ring = SigningKeyRing::generate_ephemeral();
        assert!(ring.retain_public_key_hex("02abcd").is_err());
    }
}
