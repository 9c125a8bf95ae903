#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use compliance_audit::audit::{
    Alert, AlertSink, AuditChainManager, AuditEventData, EventCategory, Outcome, RiskLevel,
};
use compliance_audit::config::{AuditConfig, EventBusConfig};
use compliance_audit::crypto::CryptographicIntegrityManager;
use compliance_audit::database::MemoryAuditStore;

/// Build a low-risk data access payload
pub fn sample_event(user: &str, action: &str) -> AuditEventData {
    AuditEventData {
        event_type: "record_view".to_string(),
        category: EventCategory::DataAccess,
        risk_level: RiskLevel::Low,
        user_id: Some(user.to_string()),
        session_id: Some("sess-1".to_string()),
        resource_type: Some("document".to_string()),
        resource_id: Some(format!("doc-{}", action)),
        action: action.to_string(),
        outcome: Outcome::Success,
        ip_address: Some("10.0.0.7".to_string()),
        user_agent: Some("test-agent".to_string()),
        additional_data: BTreeMap::new(),
        phi_involved: false,
        compliance_flags: Vec::new(),
    }
}

/// Chain manager over a fresh in-memory store
pub fn memory_chain() -> (Arc<MemoryAuditStore>, Arc<AuditChainManager>) {
    let store = Arc::new(MemoryAuditStore::new());
    let chain = Arc::new(AuditChainManager::new(
        store.clone(),
        Arc::new(CryptographicIntegrityManager::ephemeral()),
    ));
    (store, chain)
}

/// Bus settings with short timers so tests settle quickly
pub fn test_bus_config() -> EventBusConfig {
    EventBusConfig {
        queue_capacity: 256,
        poll_interval_ms: 20,
        drain_grace_ms: 2_000,
        max_error_events_per_sec: 100,
    }
}

pub fn test_config() -> AuditConfig {
    let mut config = AuditConfig::default();
    config.database_url = "sqlite::memory:".to_string();
    config.event_bus = test_bus_config();
    config.alerts.retry_backoff_ms = 10;
    config.alerts.delivery_timeout_ms = 500;
    config
}

/// Alert sink that records everything delivered to it
#[derive(Default)]
pub struct CollectingSink {
    pub alerts: Mutex<Vec<Alert>>,
}

impl CollectingSink {
    pub fn delivered(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn deliver(&self, alert: &Alert) -> bool {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
        true
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn wait_until<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
