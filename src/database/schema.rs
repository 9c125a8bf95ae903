// Audit chain schema, applied by `SqliteAuditStore::run_migrations`

pub const AUDIT_CHAIN_SCHEMA: &str = include_str!("../../migrations/001_audit_chain.sql");
