//! Wiring for one audit deployment.
//!
//! Owns every component instead of exposing process-wide singletons, so
//! tests and embedders can run several isolated instances side by side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::audit::{
    AlertSink, AuditChainManager, AuditForwardingHandler, EnterpriseAuditSystem,
    RealTimeAlertManager, TracingAlertSink,
};
use crate::config::AuditConfig;
use crate::crypto::{CryptographicIntegrityManager, SigningKeyRing};
use crate::database::AuditStore;
use crate::error::Result;
use crate::events::{EventBus, EventHandler, EventType};

/// Event types recorded in the audit chain when they pass through the bus.
/// Bus lifecycle events are not audited.
pub const AUDITED_EVENT_TYPES: &[EventType] = &[
    EventType::ErrorOccurred,
    EventType::UserLogin,
    EventType::UserLogout,
    EventType::UserCreated,
    EventType::UserUpdated,
    EventType::PermissionChanged,
    EventType::DocumentUploaded,
    EventType::DocumentAccessed,
    EventType::DocumentClassified,
    EventType::DocumentDeleted,
    EventType::PhiAccessed,
    EventType::ModelDeployed,
    EventType::ModelInference,
    EventType::ComputationStarted,
    EventType::ComputationCompleted,
    EventType::AnalyzerResult,
    EventType::SecurityAlert,
    EventType::ComplianceViolation,
    EventType::ConfigurationChanged,
];

pub struct AuditContext {
    pub crypto: Arc<CryptographicIntegrityManager>,
    pub chain: Arc<AuditChainManager>,
    pub alerts: Arc<RealTimeAlertManager>,
    pub audit: Arc<EnterpriseAuditSystem>,
    pub bus: EventBus,
    forwarding: AtomicBool,
}

impl AuditContext {
    pub fn new(config: &AuditConfig, store: Arc<dyn AuditStore>) -> Result<Self> {
        let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(TracingAlertSink)];
        Self::with_sinks(config, store, sinks)
    }

    pub fn with_sinks(
        config: &AuditConfig,
        store: Arc<dyn AuditStore>,
        sinks: Vec<Arc<dyn AlertSink>>,
    ) -> Result<Self> {
        let keys = SigningKeyRing::load(&config.signing)?;
        let crypto = Arc::new(CryptographicIntegrityManager::new(keys));
        let chain = Arc::new(AuditChainManager::new(store, crypto.clone()));
        let alerts = Arc::new(RealTimeAlertManager::new(config.alerts.clone(), sinks));
        let audit = Arc::new(EnterpriseAuditSystem::new(chain.clone(), alerts.clone()));
        let bus = EventBus::new(config.event_bus.clone());

        Ok(Self {
            crypto,
            chain,
            alerts,
            audit,
            bus,
            forwarding: AtomicBool::new(false),
        })
    }

    /// Start dispatch and route auditable bus events into the chain
    pub async fn start(&self) {
        if self.bus.is_running() {
            return;
        }
        if !self.forwarding.swap(true, Ordering::SeqCst) {
            let forwarder: Arc<dyn EventHandler> =
                Arc::new(AuditForwardingHandler::new(self.audit.clone()));
            for event_type in AUDITED_EVENT_TYPES {
                self.bus.subscribe(*event_type, forwarder.clone()).await;
            }
        }
        self.bus.start().await;
        info!(
            "Audit context started: forwarding {} event types",
            AUDITED_EVENT_TYPES.len()
        );
    }

    pub async fn shutdown(&self) {
        self.bus.stop().await;
        info!("Audit context shut down");
    }
}
