use async_trait::async_trait;
use tokio::sync::Mutex;

use super::AuditStore;
use crate::audit::entry::{AuditChainEntry, GENESIS_HASH};
use crate::error::{AuditError, Result};

/// In-process audit store. Rows are kept sorted by `created_at`; rows with
/// equal timestamps stay in insertion order.
#[derive(Default)]
pub struct MemoryAuditStore {
    rows: Mutex<Vec<AuditChainEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row without the tail check, e.g. legacy rows imported from
    /// before chaining existed.
    pub async fn insert_unchecked(&self, entry: AuditChainEntry) {
        Self::insert_ordered(&mut *self.rows.lock().await, entry);
    }

    /// Mutate a stored row in place. Used by corruption drills that check
    /// the verifier catches out-of-band edits.
    pub async fn tamper<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut AuditChainEntry),
    {
        let mut rows = self.rows.lock().await;
        match rows.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                mutate(row);
                // the edit may have moved created_at
                rows.sort_by_key(|row| row.created_at);
                true
            }
            None => false,
        }
    }

    fn insert_ordered(rows: &mut Vec<AuditChainEntry>, entry: AuditChainEntry) {
        let at = rows.partition_point(|row| row.created_at <= entry.created_at);
        rows.insert(at, entry);
    }

    fn tail_hash(rows: &[AuditChainEntry]) -> &str {
        rows.iter()
            .rev()
            .find_map(|row| row.chain_hash())
            .unwrap_or(GENESIS_HASH)
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditChainEntry, expected_previous: &str) -> Result<()> {
        let mut rows = self.rows.lock().await;

        let tail = Self::tail_hash(&rows);
        if tail != expected_previous {
            return Err(AuditError::ChainConflict {
                expected: expected_previous.to_string(),
                actual: tail.to_string(),
            });
        }
        if rows.iter().any(|row| row.id == entry.id) {
            return Err(AuditError::Persistence(format!(
                "Duplicate audit entry id {}",
                entry.id
            )));
        }

        Self::insert_ordered(&mut rows, entry.clone());
        Ok(())
    }

    async fn query_latest(&self) -> Result<Option<AuditChainEntry>> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().rev().find(|row| !row.is_legacy()).cloned())
    }

    async fn query_range(&self, ascending: bool, limit: usize) -> Result<Vec<AuditChainEntry>> {
        let rows = self.rows.lock().await;
        let selected = if ascending {
            rows.iter().take(limit).cloned().collect()
        } else {
            rows.iter().rev().take(limit).cloned().collect()
        };
        Ok(selected)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.lock().await.len() as u64)
    }
}
