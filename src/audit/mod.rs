//! Compliance Audit Trail
//!
//! Append-only, hash-chained, signed audit entries with tamper detection
//! and real-time alerting on classified events.

pub mod alerts;
pub mod chain;
pub mod entry;
pub mod system;
pub mod verify;

pub use alerts::{Alert, AlertKind, AlertSeverity, AlertSink, RealTimeAlertManager, TracingAlertSink};
pub use chain::AuditChainManager;
pub use entry::{
    AuditChainEntry, AuditEventData, ChainSeal, EventCategory, Outcome, RiskLevel, GENESIS_HASH,
};
pub use system::{audit_request_for, AuditEventRequest, AuditForwardingHandler, EnterpriseAuditSystem};
pub use verify::{
    verify_entries, ChainBreak, ChainVerificationReport, IntegrityError, IntegrityErrorKind,
    SignatureError, VerificationStatus,
};
