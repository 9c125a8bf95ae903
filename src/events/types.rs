//! Event types published on the in-process event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::audit::entry::Outcome;

/// Closed set of event types producers may publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SystemStartup,
    SystemShutdown,
    ErrorOccurred,
    UserLogin,
    UserLogout,
    UserCreated,
    UserUpdated,
    PermissionChanged,
    DocumentUploaded,
    DocumentAccessed,
    DocumentClassified,
    DocumentDeleted,
    PhiAccessed,
    ModelDeployed,
    ModelInference,
    ComputationStarted,
    ComputationCompleted,
    AnalyzerResult,
    SecurityAlert,
    ComplianceViolation,
    ConfigurationChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SystemStartup => "system_startup",
            EventType::SystemShutdown => "system_shutdown",
            EventType::ErrorOccurred => "error_occurred",
            EventType::UserLogin => "user_login",
            EventType::UserLogout => "user_logout",
            EventType::UserCreated => "user_created",
            EventType::UserUpdated => "user_updated",
            EventType::PermissionChanged => "permission_changed",
            EventType::DocumentUploaded => "document_uploaded",
            EventType::DocumentAccessed => "document_accessed",
            EventType::DocumentClassified => "document_classified",
            EventType::DocumentDeleted => "document_deleted",
            EventType::PhiAccessed => "phi_accessed",
            EventType::ModelDeployed => "model_deployed",
            EventType::ModelInference => "model_inference",
            EventType::ComputationStarted => "computation_started",
            EventType::ComputationCompleted => "computation_completed",
            EventType::AnalyzerResult => "analyzer_result",
            EventType::SecurityAlert => "security_alert",
            EventType::ComplianceViolation => "compliance_violation",
            EventType::ConfigurationChanged => "configuration_changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pub/sub message. Consumed once by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub action: Option<String>,
    pub outcome: Outcome,
    pub data: BTreeMap<String, serde_json::Value>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            user_id: None,
            session_id: None,
            resource_type: None,
            resource_id: None,
            action: None,
            outcome: Outcome::Success,
            data: BTreeMap::new(),
            metadata: BTreeMap::new(),
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }
}
