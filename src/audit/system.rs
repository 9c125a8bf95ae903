//! Enterprise Audit System
//!
//! Facade used by domain producers: classifies a log call, appends it to
//! the chain, then hands the persisted entry to real-time alerting. The two
//! halves are isolated; alerting can never fail a write that succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::audit::alerts::RealTimeAlertManager;
use crate::audit::chain::AuditChainManager;
use crate::audit::entry::{AuditChainEntry, AuditEventData, EventCategory, Outcome, RiskLevel};
use crate::audit::verify::ChainVerificationReport;
use crate::error::Result;
use crate::events::{Event, EventHandler, EventType, HandlerResult};

pub const FLAG_HIPAA: &str = "HIPAA";
pub const FLAG_SOC2_MONITORING: &str = "SOC2_CC7.2";
pub const FLAG_SOC2_CHANGE_MANAGEMENT: &str = "SOC2_CC8.1";
pub const FLAG_SOC2_ACCESS: &str = "SOC2_A1.2";

/// One audit log call
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEventRequest {
    pub event_type: String,
    pub category: EventCategory,
    pub risk_level: RiskLevel,
    pub action: String,
    pub outcome: Outcome,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub additional_data: BTreeMap<String, Value>,
    pub phi_involved: bool,
    pub compliance_flags: Vec<String>,
}

impl AuditEventRequest {
    pub fn new(
        event_type: impl Into<String>,
        category: EventCategory,
        risk_level: RiskLevel,
        action: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            category,
            risk_level,
            action: action.into(),
            outcome,
            user_id: None,
            session_id: None,
            resource_type: None,
            resource_id: None,
            ip_address: None,
            user_agent: None,
            additional_data: BTreeMap::new(),
            phi_involved: false,
            compliance_flags: Vec::new(),
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

    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    pub fn with_phi(mut self, phi_involved: bool) -> Self {
        self.phi_involved = phi_involved;
        self
    }

    pub fn with_compliance_flag(mut self, flag: impl Into<String>) -> Self {
        self.compliance_flags.push(flag.into());
        self
    }

    /// Apply the compliance classification rules. Flags are a sorted set,
    /// so the result does not depend on the order they were supplied in.
    pub fn classify(self) -> AuditEventData {
        let mut flags: BTreeSet<String> = self.compliance_flags.into_iter().collect();

        if self.phi_involved {
            flags.insert(FLAG_HIPAA.to_string());
            flags.insert(FLAG_SOC2_MONITORING.to_string());
        }
        if self.risk_level.is_elevated() {
            flags.insert(FLAG_SOC2_CHANGE_MANAGEMENT.to_string());
        }
        if self.category == EventCategory::Authentication {
            flags.insert(FLAG_SOC2_ACCESS.to_string());
        }

        AuditEventData {
            event_type: self.event_type,
            category: self.category,
            risk_level: self.risk_level,
            user_id: self.user_id,
            session_id: self.session_id,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            action: self.action,
            outcome: self.outcome,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            additional_data: self.additional_data,
            phi_involved: self.phi_involved,
            compliance_flags: flags.into_iter().collect(),
        }
    }
}

pub struct EnterpriseAuditSystem {
    chain: Arc<AuditChainManager>,
    alerts: Arc<RealTimeAlertManager>,
}

impl EnterpriseAuditSystem {
    pub fn new(chain: Arc<AuditChainManager>, alerts: Arc<RealTimeAlertManager>) -> Self {
        Self { chain, alerts }
    }

    pub fn chain(&self) -> &Arc<AuditChainManager> {
        &self.chain
    }

    pub fn alerts(&self) -> &Arc<RealTimeAlertManager> {
        &self.alerts
    }

    /// Classify, persist, and alert on one audit event. Returns the
    /// persisted entry, or the error that prevented persisting it.
    pub async fn log_event(&self, request: AuditEventRequest) -> Result<AuditChainEntry> {
        let data = request.classify();
        let entry = self.chain.append(data).await.map_err(|e| {
            error!("Failed to persist audit event: {}", e);
            e
        })?;

        match catch_unwind(AssertUnwindSafe(|| self.alerts.process_event(&entry))) {
            Ok(alerts) if !alerts.is_empty() => {
                info!("Audit entry {} raised {} alerts", entry.id, alerts.len());
            }
            Ok(_) => {}
            Err(_) => error!("Alert evaluation panicked for audit entry {}", entry.id),
        }

        debug!("Logged audit event: {}", entry.summary());
        Ok(entry)
    }

    pub async fn verify_integrity(&self, limit: usize) -> ChainVerificationReport {
        self.chain.verify_range(limit).await
    }
}

fn category_for(event_type: EventType) -> EventCategory {
    match event_type {
        EventType::UserLogin | EventType::UserLogout => EventCategory::Authentication,
        EventType::PermissionChanged => EventCategory::Authorization,
        EventType::UserCreated | EventType::UserUpdated => EventCategory::AdminAction,
        EventType::DocumentUploaded | EventType::DocumentClassified | EventType::DocumentDeleted => {
            EventCategory::DataModification
        }
        EventType::DocumentAccessed
        | EventType::ModelInference
        | EventType::ComputationStarted
        | EventType::ComputationCompleted
        | EventType::AnalyzerResult => EventCategory::DataAccess,
        EventType::PhiAccessed => EventCategory::PhiAccess,
        EventType::SystemStartup
        | EventType::SystemShutdown
        | EventType::ModelDeployed
        | EventType::ConfigurationChanged => EventCategory::SystemConfiguration,
        EventType::SecurityAlert | EventType::ErrorOccurred => EventCategory::SecurityEvent,
        EventType::ComplianceViolation => EventCategory::Compliance,
    }
}

fn default_risk_for(event_type: EventType) -> RiskLevel {
    match event_type {
        EventType::SecurityAlert | EventType::ComplianceViolation | EventType::PermissionChanged => {
            RiskLevel::High
        }
        EventType::DocumentDeleted | EventType::ErrorOccurred | EventType::ConfigurationChanged => {
            RiskLevel::Medium
        }
        _ => RiskLevel::Low,
    }
}

/// Translate a bus event into an audit log call. `risk_level` and
/// `phi_involved` keys in the event data override the defaults.
pub fn audit_request_for(event: &Event) -> AuditEventRequest {
    let risk_level = event
        .data
        .get("risk_level")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| default_risk_for(event.event_type));
    let phi_involved = event.event_type == EventType::PhiAccessed
        || event.data.get("phi_involved").and_then(Value::as_bool).unwrap_or(false);

    let mut additional_data = event.data.clone();
    additional_data.insert("event_id".to_string(), Value::from(event.event_id.clone()));
    if !event.metadata.is_empty() {
        let metadata: serde_json::Map<String, Value> = event
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        additional_data.insert("metadata".to_string(), Value::Object(metadata));
    }

    AuditEventRequest {
        event_type: event.event_type.as_str().to_string(),
        category: category_for(event.event_type),
        risk_level,
        action: event
            .action
            .clone()
            .unwrap_or_else(|| event.event_type.as_str().to_string()),
        outcome: event.outcome,
        user_id: event.user_id.clone(),
        session_id: event.session_id.clone(),
        resource_type: event.resource_type.clone(),
        resource_id: event.resource_id.clone(),
        ip_address: event.ip_address.clone(),
        user_agent: event.user_agent.clone(),
        additional_data,
        phi_involved,
        compliance_flags: Vec::new(),
    }
}

/// Bus subscriber that records events in the audit chain
pub struct AuditForwardingHandler {
    audit: Arc<EnterpriseAuditSystem>,
}

impl AuditForwardingHandler {
    pub fn new(audit: Arc<EnterpriseAuditSystem>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl EventHandler for AuditForwardingHandler {
    fn name(&self) -> &str {
        "audit-forwarder"
    }

    async fn handle(&self, event: &Event) -> HandlerResult {
        self.audit.log_event(audit_request_for(event)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;
    use crate::crypto::CryptographicIntegrityManager;
    use crate::database::MemoryAuditStore;

    fn system() -> EnterpriseAuditSystem {
        let chain = AuditChainManager::new(
            Arc::new(MemoryAuditStore::new()),
            Arc::new(CryptographicIntegrityManager::ephemeral()),
        );
        let alerts = RealTimeAlertManager::new(AlertConfig::default(), Vec::new());
        EnterpriseAuditSystem::new(Arc::new(chain), Arc::new(alerts))
    }

    #[test]
    fn test_classification_rules() {
        let data = AuditEventRequest::new(
            "user_login",
            EventCategory::Authentication,
            RiskLevel::Critical,
            "login",
            Outcome::Success,
        )
        .with_phi(true)
        .with_compliance_flag("CUSTOM")
        .classify();

        assert_eq!(
            data.compliance_flags,
            vec!["CUSTOM", "HIPAA", "SOC2_A1.2", "SOC2_CC7.2", "SOC2_CC8.1"]
        );
    }

    #[test]
    fn test_classification_is_order_independent() {
        let a = AuditEventRequest::new("x", EventCategory::DataAccess, RiskLevel::High, "a", Outcome::Success)
            .with_compliance_flag("B")
            .with_compliance_flag("A")
            .with_compliance_flag("SOC2_CC8.1")
            .classify();
        let b = AuditEventRequest::new("x", EventCategory::DataAccess, RiskLevel::High, "a", Outcome::Success)
            .with_compliance_flag("A")
            .with_compliance_flag("B")
            .classify();
        assert_eq!(a.compliance_flags, b.compliance_flags);
    }

    #[test]
    fn test_low_risk_event_gets_no_flags() {
        let data = AuditEventRequest::new(
            "document_view",
            EventCategory::DataAccess,
            RiskLevel::Medium,
            "view",
            Outcome::Success,
        )
        .classify();
        assert!(data.compliance_flags.is_empty());
    }

    #[tokio::test]
    async fn test_log_event_persists_and_verifies() {
        let audit = system();
        let entry = audit
            .log_event(
                AuditEventRequest::new(
                    "patient_chart_view",
                    EventCategory::PhiAccess,
                    RiskLevel::Low,
                    "view",
                    Outcome::Success,
                )
                .with_user("dr-house")
                .with_resource("patient", "p-42")
                .with_phi(true),
            )
            .await
            .unwrap();

        assert!(entry.compliance_flags.contains(&"HIPAA".to_string()));
        assert_eq!(entry.resource_id.as_deref(), Some("p-42"));

        let report = audit.verify_integrity(100).await;
        assert!(report.is_valid());
        assert_eq!(report.entries_checked, 1);
    }

    #[test]
    fn test_event_translation() {
        let event = Event::new(EventType::UserLogin)
            .with_user("carol")
            .with_outcome(Outcome::Failure)
            .with_data("risk_level", "high")
            .with_metadata("request_id", "r-1");

        let request = audit_request_for(&event);
        assert_eq!(request.event_type, "user_login");
        assert_eq!(request.category, EventCategory::Authentication);
        assert_eq!(request.risk_level, RiskLevel::High);
        assert_eq!(request.action, "user_login");
        assert_eq!(request.additional_data["event_id"], Value::from(event.event_id.clone()));
        assert_eq!(request.additional_data["metadata"]["request_id"], "r-1");

        let phi = audit_request_for(&Event::new(EventType::PhiAccessed));
        assert!(phi.phi_involved);
        assert_eq!(phi.category, EventCategory::PhiAccess);
    }
}
