//! End-to-end tests: facade classification, alerting, bus forwarding

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use compliance_audit::audit::{
    Alert, AlertKind, AlertSeverity, AlertSink, AuditChainEntry, AuditEventRequest, EventCategory,
    Outcome, RiskLevel,
};
use compliance_audit::database::{AuditStore, MemoryAuditStore};
use compliance_audit::error::{AuditError, Result};
use compliance_audit::events::{Event, EventType};
use compliance_audit::AuditContext;

use common::{test_config, wait_until, CollectingSink};

fn context_with_sink() -> (Arc<MemoryAuditStore>, Arc<CollectingSink>, AuditContext) {
    let store = Arc::new(MemoryAuditStore::new());
    let sink = Arc::new(CollectingSink::default());
    let context = AuditContext::with_sinks(
        &test_config(),
        store.clone(),
        vec![sink.clone() as Arc<dyn AlertSink>],
    )
    .unwrap();
    (store, sink, context)
}

fn failed_login(user: &str) -> AuditEventRequest {
    AuditEventRequest::new(
        "user_login",
        EventCategory::Authentication,
        RiskLevel::Low,
        "login",
        Outcome::Failure,
    )
    .with_user(user)
    .with_client("198.51.100.4", "curl/8.0")
}

#[tokio::test]
async fn test_log_event_classifies_and_chains() {
    let (_, _, context) = context_with_sink();

    let login = context
        .audit
        .log_event(
            AuditEventRequest::new(
                "user_login",
                EventCategory::Authentication,
                RiskLevel::Low,
                "login",
                Outcome::Success,
            )
            .with_user("ivan"),
        )
        .await
        .unwrap();
    let chart = context
        .audit
        .log_event(
            AuditEventRequest::new(
                "patient_chart_export",
                EventCategory::PhiAccess,
                RiskLevel::High,
                "export",
                Outcome::Success,
            )
            .with_user("ivan")
            .with_resource("patient", "p-7")
            .with_data("rows", 120)
            .with_phi(true),
        )
        .await
        .unwrap();

    assert_eq!(login.compliance_flags, vec!["SOC2_A1.2"]);
    assert_eq!(chart.compliance_flags, vec!["HIPAA", "SOC2_CC7.2", "SOC2_CC8.1"]);
    assert_eq!(chart.previous_hash(), login.chain_hash());
    assert_eq!(chart.event_data["rows"], 120);

    let report = context.audit.verify_integrity(100).await;
    assert!(report.is_valid(), "{}", report.summary());
    assert_eq!(report.entries_checked, 2);
}

#[tokio::test]
async fn test_critical_event_raises_critical_alert() {
    let (_, sink, context) = context_with_sink();

    context
        .audit
        .log_event(
            AuditEventRequest::new(
                "privilege_escalation",
                EventCategory::SecurityEvent,
                RiskLevel::Medium,
                "grant_admin",
                Outcome::Success,
            )
            .with_user("judy"),
        )
        .await
        .unwrap();

    assert!(wait_until(|| sink.delivered().len() == 1).await);
    let alert = &sink.delivered()[0];
    assert_eq!(alert.kind, AlertKind::CriticalEvent);
    assert_eq!(alert.severity, AlertSeverity::Critical);
    assert_eq!(alert.user_id.as_deref(), Some("judy"));
    assert_eq!(context.alerts.alerts_raised(), 1);
}

#[tokio::test]
async fn test_high_risk_pattern_alert() {
    let (_, sink, context) = context_with_sink();

    context
        .audit
        .log_event(AuditEventRequest::new(
            "bulk_data_export",
            EventCategory::DataAccess,
            RiskLevel::High,
            "export",
            Outcome::Success,
        ))
        .await
        .unwrap();
    // same pattern at low risk stays quiet
    context
        .audit
        .log_event(AuditEventRequest::new(
            "bulk_data_export",
            EventCategory::DataAccess,
            RiskLevel::Low,
            "export",
            Outcome::Success,
        ))
        .await
        .unwrap();

    assert!(wait_until(|| !sink.delivered().is_empty()).await);
    assert_eq!(context.alerts.alerts_raised(), 1);
    assert_eq!(sink.delivered()[0].kind, AlertKind::HighRiskPattern);
}

#[tokio::test]
async fn test_repeated_failed_logins_alert_once() {
    let (_, sink, context) = context_with_sink();

    for _ in 0..4 {
        context.audit.log_event(failed_login("kim")).await.unwrap();
    }
    assert_eq!(context.alerts.alerts_raised(), 0);

    context.audit.log_event(failed_login("kim")).await.unwrap();
    context.audit.log_event(failed_login("kim")).await.unwrap();
    assert_eq!(context.alerts.alerts_raised(), 1);

    assert!(wait_until(|| sink.delivered().len() == 1).await);
    let alert = &sink.delivered()[0];
    assert_eq!(alert.kind, AlertKind::BruteForce);
    assert_eq!(alert.details["failed_attempts"], 5);

    // other accounts have their own window
    context.audit.log_event(failed_login("lee")).await.unwrap();
    assert_eq!(context.alerts.alerts_raised(), 1);
}

struct RejectingSink {
    attempts: AtomicUsize,
}

#[async_trait]
impl AlertSink for RejectingSink {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn deliver(&self, _alert: &Alert) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        false
    }
}

#[tokio::test]
async fn test_failing_sink_does_not_fail_the_write() {
    let store = Arc::new(MemoryAuditStore::new());
    let sink = Arc::new(RejectingSink {
        attempts: AtomicUsize::new(0),
    });
    let context = AuditContext::with_sinks(
        &test_config(),
        store.clone(),
        vec![sink.clone() as Arc<dyn AlertSink>],
    )
    .unwrap();

    let entry = context
        .audit
        .log_event(AuditEventRequest::new(
            "data_breach",
            EventCategory::SecurityEvent,
            RiskLevel::Critical,
            "exfiltrate",
            Outcome::Success,
        ))
        .await;
    assert!(entry.is_ok());
    assert_eq!(store.count().await.unwrap(), 1);

    assert!(wait_until(|| context.alerts.deliveries_failed() == 1).await);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
}

struct OfflineStore;

#[async_trait]
impl AuditStore for OfflineStore {
    async fn append(&self, _entry: &AuditChainEntry, _expected_previous: &str) -> Result<()> {
        Err(AuditError::Persistence("database offline".to_string()))
    }

    async fn query_latest(&self) -> Result<Option<AuditChainEntry>> {
        Ok(None)
    }

    async fn query_range(&self, _ascending: bool, _limit: usize) -> Result<Vec<AuditChainEntry>> {
        Err(AuditError::Persistence("database offline".to_string()))
    }

    async fn count(&self) -> Result<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_persistence_failure_is_reported_without_alerts() {
    let context = AuditContext::new(&test_config(), Arc::new(OfflineStore)).unwrap();

    let result = context
        .audit
        .log_event(AuditEventRequest::new(
            "data_breach",
            EventCategory::SecurityEvent,
            RiskLevel::Critical,
            "exfiltrate",
            Outcome::Success,
        ))
        .await;

    assert!(matches!(result, Err(AuditError::Persistence(_))));
    assert_eq!(context.alerts.alerts_raised(), 0);

    let report = context.audit.verify_integrity(10).await;
    assert_eq!(
        report.status,
        compliance_audit::audit::VerificationStatus::Error
    );
}

#[tokio::test]
async fn test_bus_events_are_forwarded_into_the_chain() {
    let (store, _, context) = context_with_sink();
    context.start().await;

    context
        .bus
        .publish(Event::new(EventType::UserLogin).with_user("mona"))
        .await;
    context
        .bus
        .publish(
            Event::new(EventType::PhiAccessed)
                .with_user("mona")
                .with_resource("patient", "p-1")
                .with_action("view_chart"),
        )
        .await;
    context.shutdown().await;

    let entries = store.query_range(true, 100).await.unwrap();
    assert_eq!(entries.len(), 2);

    let login = entries
        .iter()
        .find(|e| e.event_type == "user_login")
        .unwrap();
    assert_eq!(login.category, EventCategory::Authentication);
    assert!(login.compliance_flags.contains(&"SOC2_A1.2".to_string()));

    let phi = entries
        .iter()
        .find(|e| e.event_type == "phi_accessed")
        .unwrap();
    assert!(phi.phi_involved);
    assert_eq!(phi.action, "view_chart");
    assert!(phi.compliance_flags.contains(&"HIPAA".to_string()));

    let report = context.audit.verify_integrity(100).await;
    assert!(report.is_valid(), "{}", report.summary());

    let stats = context.bus.get_stats().await;
    assert_eq!(stats.events_failed, 0);
    assert!(!stats.running);
}
