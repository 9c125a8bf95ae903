//! Audit Chain Verification
//!
//! Scans persisted entries oldest to newest and reports every chain break,
//! integrity error, and signature error it finds. The scan never stops
//! early and never returns an error to its caller.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::entry::{AuditChainEntry, GENESIS_HASH};
use crate::crypto::CryptographicIntegrityManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Valid,
    Invalid,
    /// The scan could not read the store
    Error,
}

/// An entry whose stored `previous_hash` does not match its predecessor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub entry_id: String,
    pub position: usize,
    pub expected_previous: String,
    pub actual_previous: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityErrorKind {
    ContentHashMismatch,
    ChainHashMismatch,
}

/// An entry whose stored hashes do not match its recomputed hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityError {
    pub entry_id: String,
    pub kind: IntegrityErrorKind,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureError {
    pub entry_id: String,
    pub signing_key_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerificationReport {
    pub status: VerificationStatus,
    pub entries_checked: usize,
    pub legacy_entries: usize,
    pub integrity_errors: Vec<IntegrityError>,
    pub signature_errors: Vec<SignatureError>,
    pub chain_breaks: Vec<ChainBreak>,
    pub error: Option<String>,
}

impl ChainVerificationReport {
    /// Report for a scan that could not load its entries
    pub fn failed(message: String) -> Self {
        Self {
            status: VerificationStatus::Error,
            entries_checked: 0,
            legacy_entries: 0,
            integrity_errors: Vec::new(),
            signature_errors: Vec::new(),
            chain_breaks: Vec::new(),
            error: Some(message),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self.status {
            VerificationStatus::Valid => format!(
                "Audit chain is valid ({} entries, {} legacy)",
                self.entries_checked, self.legacy_entries
            ),
            VerificationStatus::Invalid => format!(
                "Audit chain is invalid ({} entries): {} chain breaks, {} integrity errors, {} signature errors",
                self.entries_checked,
                self.chain_breaks.len(),
                self.integrity_errors.len(),
                self.signature_errors.len()
            ),
            VerificationStatus::Error => format!(
                "Audit chain could not be verified: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            ),
        }
    }
}

/// Verify entries already ordered oldest to newest.
///
/// Legacy rows are counted but not checked, and do not move the expected
/// previous hash.
pub fn verify_entries(
    crypto: &CryptographicIntegrityManager,
    entries: &[AuditChainEntry],
) -> ChainVerificationReport {
    let mut chain_breaks = Vec::new();
    let mut integrity_errors = Vec::new();
    let mut signature_errors = Vec::new();
    let mut legacy_entries = 0;
    let mut expected_previous = GENESIS_HASH.to_string();

    for (position, entry) in entries.iter().enumerate() {
        let Some(seal) = &entry.seal else {
            legacy_entries += 1;
            continue;
        };

        if seal.previous_hash != expected_previous {
            warn!(
                "Chain break at entry {} ({}): expected previous {}, found {}",
                position, entry.id, expected_previous, seal.previous_hash
            );
            chain_breaks.push(ChainBreak {
                entry_id: entry.id.clone(),
                position,
                expected_previous: expected_previous.clone(),
                actual_previous: seal.previous_hash.clone(),
            });
        }

        match crypto.content_hash(&entry.event_data()) {
            Ok(content_hash) if content_hash != seal.content_hash => {
                integrity_errors.push(IntegrityError {
                    entry_id: entry.id.clone(),
                    kind: IntegrityErrorKind::ContentHashMismatch,
                    expected: content_hash,
                    actual: seal.content_hash.clone(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                integrity_errors.push(IntegrityError {
                    entry_id: entry.id.clone(),
                    kind: IntegrityErrorKind::ContentHashMismatch,
                    expected: format!("unhashable payload: {}", e),
                    actual: seal.content_hash.clone(),
                });
            }
        }

        let chain_hash = crypto.chain_hash(&seal.previous_hash, &seal.content_hash);
        if chain_hash != seal.chain_hash {
            integrity_errors.push(IntegrityError {
                entry_id: entry.id.clone(),
                kind: IntegrityErrorKind::ChainHashMismatch,
                expected: chain_hash,
                actual: seal.chain_hash.clone(),
            });
        }

        if !crypto.verify(&seal.chain_hash, &seal.digital_signature, &seal.signing_key_id) {
            signature_errors.push(SignatureError {
                entry_id: entry.id.clone(),
                signing_key_id: seal.signing_key_id.clone(),
            });
        }

        expected_previous = seal.chain_hash.clone();
    }

    let status = if chain_breaks.is_empty() && integrity_errors.is_empty() && signature_errors.is_empty() {
        VerificationStatus::Valid
    } else {
        VerificationStatus::Invalid
    };

    let report = ChainVerificationReport {
        status,
        entries_checked: entries.len(),
        legacy_entries,
        integrity_errors,
        signature_errors,
        chain_breaks,
        error: None,
    };
    info!("{}", report.summary());
    report
}
