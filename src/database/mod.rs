//! Persistence for the audit chain.
//!
//! The chain manager only talks to the [`AuditStore`] trait. Every backend
//! must make `append` a conditional insert: the write succeeds only if the
//! store's current tail still carries `expected_previous`, which is what
//! keeps concurrent writers from forking the chain.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::audit::entry::AuditChainEntry;
use crate::error::Result;

pub use memory::MemoryAuditStore;
pub use sqlite::SqliteAuditStore;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Durably insert `entry` if the chain tail hash equals
    /// `expected_previous` (the genesis hash for an empty chain). Fails with
    /// `AuditError::ChainConflict` otherwise and writes nothing.
    async fn append(&self, entry: &AuditChainEntry, expected_previous: &str) -> Result<()>;

    /// Most recent chained entry by creation time. Legacy rows without
    /// chain fields are not considered.
    async fn query_latest(&self) -> Result<Option<AuditChainEntry>>;

    /// Entries ordered by creation time, legacy rows included.
    async fn query_range(&self, ascending: bool, limit: usize) -> Result<Vec<AuditChainEntry>>;

    async fn count(&self) -> Result<u64>;
}
