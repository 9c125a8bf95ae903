//! Audit Chain Entry
//!
//! Defines the transient event payload that gets classified and hashed,
//! and the persisted, immutable chain entry that binds it to its predecessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Previous-hash value of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Compliance classification of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Authentication,
    Authorization,
    DataAccess,
    DataModification,
    SystemConfiguration,
    SecurityEvent,
    PhiAccess,
    AdminAction,
    Compliance,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Authentication => "authentication",
            EventCategory::Authorization => "authorization",
            EventCategory::DataAccess => "data_access",
            EventCategory::DataModification => "data_modification",
            EventCategory::SystemConfiguration => "system_configuration",
            EventCategory::SecurityEvent => "security_event",
            EventCategory::PhiAccess => "phi_access",
            EventCategory::AdminAction => "admin_action",
            EventCategory::Compliance => "compliance",
        }
    }
}

impl FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authentication" => Ok(EventCategory::Authentication),
            "authorization" => Ok(EventCategory::Authorization),
            "data_access" => Ok(EventCategory::DataAccess),
            "data_modification" => Ok(EventCategory::DataModification),
            "system_configuration" => Ok(EventCategory::SystemConfiguration),
            "security_event" => Ok(EventCategory::SecurityEvent),
            "phi_access" => Ok(EventCategory::PhiAccess),
            "admin_action" => Ok(EventCategory::AdminAction),
            "compliance" => Ok(EventCategory::Compliance),
            _ => Err(format!("Unknown event category: {}", s)),
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level assigned by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Error => "error",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "error" => Ok(Outcome::Error),
            _ => Err(format!("Unknown outcome: {}", s)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified audit payload. Consumed once to produce a chain entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEventData {
    pub event_type: String,
    pub category: EventCategory,
    pub risk_level: RiskLevel,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub action: String,
    pub outcome: Outcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub additional_data: BTreeMap<String, serde_json::Value>,
    pub phi_involved: bool,
    pub compliance_flags: Vec<String>,
}

/// Cryptographic fields binding an entry into the chain.
///
/// Rows written before the chain existed carry no seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSeal {
    pub content_hash: String,
    pub previous_hash: String,
    pub chain_hash: String,
    pub digital_signature: String,
    pub signing_key_id: String,
}

/// Persisted, immutable audit chain entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditChainEntry {
    pub id: String,
    pub event_type: String,
    pub category: EventCategory,
    pub risk_level: RiskLevel,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub action: String,
    pub outcome: Outcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub event_data: BTreeMap<String, serde_json::Value>,
    pub phi_involved: bool,
    pub compliance_flags: Vec<String>,
    #[serde(flatten)]
    pub seal: Option<ChainSeal>,
    pub created_at: DateTime<Utc>,
}

impl AuditChainEntry {
    /// Build a sealed entry from its payload
    pub fn sealed(
        id: String,
        data: AuditEventData,
        seal: ChainSeal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_type: data.event_type,
            category: data.category,
            risk_level: data.risk_level,
            user_id: data.user_id,
            session_id: data.session_id,
            resource_type: data.resource_type,
            resource_id: data.resource_id,
            action: data.action,
            outcome: data.outcome,
            ip_address: data.ip_address,
            user_agent: data.user_agent,
            event_data: data.additional_data,
            phi_involved: data.phi_involved,
            compliance_flags: data.compliance_flags,
            seal: Some(seal),
            created_at,
        }
    }

    /// Reconstruct the payload the content hash was computed over
    pub fn event_data(&self) -> AuditEventData {
        AuditEventData {
            event_type: self.event_type.clone(),
            category: self.category,
            risk_level: self.risk_level,
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            action: self.action.clone(),
            outcome: self.outcome,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            additional_data: self.event_data.clone(),
            phi_involved: self.phi_involved,
            compliance_flags: self.compliance_flags.clone(),
        }
    }

    pub fn chain_hash(&self) -> Option<&str> {
        self.seal.as_ref().map(|s| s.chain_hash.as_str())
    }

    pub fn previous_hash(&self) -> Option<&str> {
        self.seal.as_ref().map(|s| s.previous_hash.as_str())
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.seal.as_ref().map(|s| s.content_hash.as_str())
    }

    pub fn is_legacy(&self) -> bool {
        self.seal.is_none()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} [{}/{}] {} -> {} ({})",
            self.event_type,
            self.category,
            self.risk_level,
            self.action,
            self.outcome,
            self.id
        )
    }
}
