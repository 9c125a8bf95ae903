//! Audit Chain Manager
//!
//! Sequences, signs, and persists chain entries. Appends are serialized by
//! an async mutex, and the store's conditional insert rejects any write
//! whose expected tail has moved, so two managers sharing one store cannot
//! fork the chain either.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audit::entry::{AuditChainEntry, AuditEventData, ChainSeal, GENESIS_HASH};
use crate::audit::verify::{verify_entries, ChainVerificationReport};
use crate::crypto::CryptographicIntegrityManager;
use crate::database::AuditStore;
use crate::error::{AuditError, Result};

/// Attempts per append when the tail moves underneath us
const MAX_APPEND_ATTEMPTS: usize = 8;

pub struct AuditChainManager {
    store: Arc<dyn AuditStore>,
    crypto: Arc<CryptographicIntegrityManager>,
    append_lock: Mutex<()>,
}

impl AuditChainManager {
    pub fn new(store: Arc<dyn AuditStore>, crypto: Arc<CryptographicIntegrityManager>) -> Self {
        Self {
            store,
            crypto,
            append_lock: Mutex::new(()),
        }
    }

    pub fn crypto(&self) -> &Arc<CryptographicIntegrityManager> {
        &self.crypto
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Chain hash of the most recently persisted entry, or the genesis hash
    /// for an empty chain. Always read from the store.
    pub async fn get_last_entry_hash(&self) -> Result<String> {
        Ok(self
            .store
            .query_latest()
            .await?
            .and_then(|entry| entry.seal.map(|seal| seal.chain_hash))
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    /// Hash, sign, and durably persist a new entry at the chain tail
    pub async fn append(&self, event: AuditEventData) -> Result<AuditChainEntry> {
        let _guard = self.append_lock.lock().await;

        let content_hash = self.crypto.content_hash(&event)?;
        let id = Uuid::new_v4().to_string();

        for attempt in 1..=MAX_APPEND_ATTEMPTS {
            let tail = self.store.query_latest().await?;
            let previous_hash = tail
                .as_ref()
                .and_then(|entry| entry.chain_hash())
                .unwrap_or(GENESIS_HASH)
                .to_string();

            // keep creation order consistent with chain order
            let now = Utc::now();
            let created_at = match &tail {
                Some(entry) if entry.created_at > now => entry.created_at,
                _ => now,
            };

            let chain_hash = self.crypto.chain_hash(&previous_hash, &content_hash);
            let signed = self.crypto.sign(&chain_hash).map_err(|e| {
                error!("Refusing to persist unsigned audit entry: {}", e);
                e
            })?;

            let entry = AuditChainEntry::sealed(
                id.clone(),
                event.clone(),
                ChainSeal {
                    content_hash: content_hash.clone(),
                    previous_hash: previous_hash.clone(),
                    chain_hash,
                    digital_signature: signed.signature,
                    signing_key_id: signed.key_id,
                },
                created_at,
            );

            match self.store.append(&entry, &previous_hash).await {
                Ok(()) => {
                    debug!("Appended audit entry: {}", entry.summary());
                    return Ok(entry);
                }
                Err(AuditError::ChainConflict { expected, actual }) => {
                    warn!(
                        "Audit chain tail moved (attempt {}/{}): expected {}, found {}",
                        attempt, MAX_APPEND_ATTEMPTS, expected, actual
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(AuditError::Persistence(format!(
            "Audit append abandoned after {} conflicting attempts",
            MAX_APPEND_ATTEMPTS
        )))
    }

    /// Scan up to `limit` entries oldest to newest. Store failures are
    /// reported in the returned report.
    pub async fn verify_range(&self, limit: usize) -> ChainVerificationReport {
        match self.store.query_range(true, limit).await {
            Ok(entries) => verify_entries(&self.crypto, &entries),
            Err(e) => {
                error!("Audit chain verification could not read the store: {}", e);
                ChainVerificationReport::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{EventCategory, Outcome, RiskLevel};
    use crate::audit::verify::VerificationStatus;
    use crate::database::MemoryAuditStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn event(action: &str) -> AuditEventData {
        AuditEventData {
            event_type: "document_view".to_string(),
            category: EventCategory::DataAccess,
            risk_level: RiskLevel::Low,
            user_id: Some("alice".to_string()),
            session_id: None,
            resource_type: Some("document".to_string()),
            resource_id: None,
            action: action.to_string(),
            outcome: Outcome::Success,
            ip_address: None,
            user_agent: None,
            additional_data: BTreeMap::new(),
            phi_involved: false,
            compliance_flags: vec![],
        }
    }

    fn manager() -> (Arc<MemoryAuditStore>, AuditChainManager) {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = AuditChainManager::new(
            store.clone(),
            Arc::new(CryptographicIntegrityManager::ephemeral()),
        );
        (store, chain)
    }

    #[tokio::test]
    async fn test_empty_chain_starts_at_genesis() {
        let (_, chain) = manager();
        assert_eq!(chain.get_last_entry_hash().await.unwrap(), GENESIS_HASH);
    }

    #[tokio::test]
    async fn test_append_links_entries() {
        let (_, chain) = manager();
        let e1 = chain.append(event("a")).await.unwrap();
        let e2 = chain.append(event("b")).await.unwrap();

        assert_eq!(e1.previous_hash(), Some(GENESIS_HASH));
        assert_eq!(e2.previous_hash(), e1.chain_hash());
        assert_eq!(chain.get_last_entry_hash().await.unwrap(), e2.chain_hash().unwrap());
        assert!(e2.created_at >= e1.created_at);
    }

    #[tokio::test]
    async fn test_tail_is_read_from_store() {
        let (store, chain) = manager();
        let e1 = chain.append(event("a")).await.unwrap();

        // a second writer on the same store advances the tail
        let other = AuditChainManager::new(store.clone(), chain.crypto().clone());
        let e2 = other.append(event("b")).await.unwrap();

        assert_eq!(e2.previous_hash(), e1.chain_hash());
        assert_eq!(chain.get_last_entry_hash().await.unwrap(), e2.chain_hash().unwrap());
    }

    struct UnavailableStore;

    #[async_trait]
    impl AuditStore for UnavailableStore {
        async fn append(&self, _: &AuditChainEntry, _: &str) -> Result<()> {
            Err(AuditError::Persistence("disk full".to_string()))
        }
        async fn query_latest(&self) -> Result<Option<AuditChainEntry>> {
            Ok(None)
        }
        async fn query_range(&self, _: bool, _: usize) -> Result<Vec<AuditChainEntry>> {
            Err(AuditError::Persistence("connection refused".to_string()))
        }
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_store_failures_propagate_and_verify_reports() {
        let chain = AuditChainManager::new(
            Arc::new(UnavailableStore),
            Arc::new(CryptographicIntegrityManager::ephemeral()),
        );

        let err = chain.append(event("a")).await.unwrap_err();
        assert!(matches!(err, AuditError::Persistence(_)));

        let report = chain.verify_range(10).await;
        assert_eq!(report.status, VerificationStatus::Error);
    }
}
