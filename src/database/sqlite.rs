use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::schema::AUDIT_CHAIN_SCHEMA;
use super::AuditStore;
use crate::audit::entry::{AuditChainEntry, ChainSeal, GENESIS_HASH};
use crate::error::{AuditError, Result};

const COLUMNS: &str = "id, event_type, category, risk_level, user_id, session_id, \
     resource_type, resource_id, action, outcome, ip_address, user_agent, event_data, \
     phi_involved, compliance_flags, content_hash, previous_hash, chain_hash, \
     digital_signature, signing_key_id, created_at";

const TAIL_HASH: &str = "SELECT chain_hash FROM audit_chain WHERE chain_hash IS NOT NULL \
     ORDER BY created_at DESC, seq DESC LIMIT 1";

/// SQLite-backed audit store
#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        // an in-memory database lives and dies with its single connection
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Audit store connected: {}", database_url);
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(AUDIT_CHAIN_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a row without the tail check, e.g. legacy rows imported from
    /// before chaining existed.
    pub async fn insert_unchecked(&self, entry: &AuditChainEntry) -> Result<()> {
        let sql = format!(
            "INSERT INTO audit_chain ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        );
        bind_entry(sqlx::query(&sql), entry)?
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tail_hash(&self) -> Result<String> {
        let tail: Option<String> = sqlx::query_scalar(TAIL_HASH)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tail.unwrap_or_else(|| GENESIS_HASH.to_string()))
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_entry<'q>(query: SqliteQuery<'q>, entry: &AuditChainEntry) -> Result<SqliteQuery<'q>> {
    let event_data = serde_json::to_string(&entry.event_data)?;
    let compliance_flags = serde_json::to_string(&entry.compliance_flags)?;
    let seal = entry.seal.clone();

    Ok(query
        .bind(entry.id.clone())
        .bind(entry.event_type.clone())
        .bind(entry.category.as_str())
        .bind(entry.risk_level.as_str())
        .bind(entry.user_id.clone())
        .bind(entry.session_id.clone())
        .bind(entry.resource_type.clone())
        .bind(entry.resource_id.clone())
        .bind(entry.action.clone())
        .bind(entry.outcome.as_str())
        .bind(entry.ip_address.clone())
        .bind(entry.user_agent.clone())
        .bind(event_data)
        .bind(entry.phi_involved)
        .bind(compliance_flags)
        .bind(seal.as_ref().map(|s| s.content_hash.clone()))
        .bind(seal.as_ref().map(|s| s.previous_hash.clone()))
        .bind(seal.as_ref().map(|s| s.chain_hash.clone()))
        .bind(seal.as_ref().map(|s| s.digital_signature.clone()))
        .bind(seal.as_ref().map(|s| s.signing_key_id.clone()))
        .bind(entry.created_at.timestamp_micros()))
}

fn decode_err(column: &str, err: impl std::fmt::Display) -> AuditError {
    AuditError::Persistence(format!("Malformed audit row column {}: {}", column, err))
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditChainEntry> {
    let category: String = row.try_get("category")?;
    let risk_level: String = row.try_get("risk_level")?;
    let outcome: String = row.try_get("outcome")?;
    let event_data: String = row.try_get("event_data")?;
    let compliance_flags: String = row.try_get("compliance_flags")?;
    let created_at: i64 = row.try_get("created_at")?;

    let content_hash: Option<String> = row.try_get("content_hash")?;
    let previous_hash: Option<String> = row.try_get("previous_hash")?;
    let chain_hash: Option<String> = row.try_get("chain_hash")?;
    let digital_signature: Option<String> = row.try_get("digital_signature")?;
    let signing_key_id: Option<String> = row.try_get("signing_key_id")?;

    let seal = match (content_hash, previous_hash, chain_hash) {
        (Some(content_hash), Some(previous_hash), Some(chain_hash)) => Some(ChainSeal {
            content_hash,
            previous_hash,
            chain_hash,
            digital_signature: digital_signature.unwrap_or_default(),
            signing_key_id: signing_key_id.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(AuditChainEntry {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        category: category.parse().map_err(|e| decode_err("category", e))?,
        risk_level: risk_level.parse().map_err(|e| decode_err("risk_level", e))?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        action: row.try_get("action")?,
        outcome: outcome.parse().map_err(|e| decode_err("outcome", e))?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        event_data: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&event_data)
            .map_err(|e| decode_err("event_data", e))?,
        phi_involved: row.try_get("phi_involved")?,
        compliance_flags: serde_json::from_str(&compliance_flags)
            .map_err(|e| decode_err("compliance_flags", e))?,
        seal,
        created_at: DateTime::<Utc>::from_timestamp_micros(created_at)
            .ok_or_else(|| decode_err("created_at", created_at))?,
    })
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entry: &AuditChainEntry, expected_previous: &str) -> Result<()> {
        // Single statement, so the tail check and the insert are atomic.
        let sql = format!(
            "INSERT INTO audit_chain ({}) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? \
             WHERE COALESCE(({}), ?) = ?",
            COLUMNS, TAIL_HASH
        );
        let result = bind_entry(sqlx::query(&sql), entry)?
            .bind(GENESIS_HASH)
            .bind(expected_previous.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuditError::ChainConflict {
                expected: expected_previous.to_string(),
                actual: self.tail_hash().await?,
            });
        }
        Ok(())
    }

    async fn query_latest(&self) -> Result<Option<AuditChainEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_chain WHERE chain_hash IS NOT NULL \
             ORDER BY created_at DESC, seq DESC LIMIT 1",
            COLUMNS
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn query_range(&self, ascending: bool, limit: usize) -> Result<Vec<AuditChainEntry>> {
        let direction = if ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT {} FROM audit_chain ORDER BY created_at {dir}, seq {dir} LIMIT ?",
            COLUMNS,
            dir = direction
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_chain")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
