//! Real-Time Alerting
//!
//! Derives alerts from classified audit entries. Rule evaluation is
//! in-memory and fast; delivery to sinks happens on detached tasks with a
//! per-attempt timeout and bounded retries, so a slow or failing sink never
//! holds up the audit write that triggered it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::entry::{AuditChainEntry, EventCategory, Outcome, RiskLevel};
use crate::config::AlertConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CriticalEvent,
    HighRiskPattern,
    PhiAccessRate,
    BruteForce,
    ApiErrorRate,
}

/// Structured payload handed to alert sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub entry_id: String,
    pub event_type: String,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub details: BTreeMap<String, serde_json::Value>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    fn for_entry(
        kind: AlertKind,
        severity: AlertSeverity,
        title: String,
        entry: &AuditChainEntry,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            kind,
            severity,
            title,
            entry_id: entry.id.clone(),
            event_type: entry.event_type.clone(),
            user_id: entry.user_id.clone(),
            ip_address: entry.ip_address.clone(),
            details: BTreeMap::new(),
            raised_at: Utc::now(),
        }
    }

    fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

/// Delivery target for alerts (pager, SIEM, webhook). Implementations
/// report failure through the return value and must not panic.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> bool;
}

/// Writes alerts to the tracing log
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn deliver(&self, alert: &Alert) -> bool {
        match alert.severity {
            AlertSeverity::Critical => error!(
                "SECURITY ALERT [{:?}] {} (entry {}, user {:?})",
                alert.kind, alert.title, alert.entry_id, alert.user_id
            ),
            _ => warn!(
                "Security alert [{:?}] {} (entry {}, user {:?})",
                alert.kind, alert.title, alert.entry_id, alert.user_id
            ),
        }
        true
    }
}

struct KeyWindow {
    hits: VecDeque<DateTime<Utc>>,
    alerted_at: Option<DateTime<Utc>>,
}

/// Per-key sliding window counter that fires once per window
struct RateMonitor {
    window: chrono::Duration,
    fire_at: usize,
    keys: HashMap<String, KeyWindow>,
    /// Key count that triggers the next sweep of idle keys
    sweep_at: usize,
}

const MONITOR_SWEEP_THRESHOLD: usize = 1024;

impl RateMonitor {
    fn new(window: chrono::Duration, fire_at: usize) -> Self {
        Self {
            window,
            fire_at: fire_at.max(1),
            keys: HashMap::new(),
            sweep_at: MONITOR_SWEEP_THRESHOLD,
        }
    }

    /// Record a hit; returns the window count when this hit crosses the
    /// threshold and no alert fired for the key within the window.
    fn observe(&mut self, key: &str, at: DateTime<Utc>) -> Option<usize> {
        let cutoff = at - self.window;

        if self.keys.len() > self.sweep_at {
            self.keys
                .retain(|_, w| w.hits.back().map_or(false, |last| *last > cutoff));
            // amortized: live keys must double before the next full sweep
            self.sweep_at = (self.keys.len() * 2).max(MONITOR_SWEEP_THRESHOLD);
        }

        let window = self.keys.entry(key.to_string()).or_insert_with(|| KeyWindow {
            hits: VecDeque::new(),
            alerted_at: None,
        });

        while window.hits.front().map_or(false, |first| *first <= cutoff) {
            window.hits.pop_front();
        }
        window.hits.push_back(at);

        let recently_alerted = window.alerted_at.map_or(false, |t| t > cutoff);
        if window.hits.len() >= self.fire_at && !recently_alerted {
            window.alerted_at = Some(at);
            Some(window.hits.len())
        } else {
            None
        }
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RealTimeAlertManager {
    config: AlertConfig,
    sinks: Vec<Arc<dyn AlertSink>>,
    phi_access: Mutex<RateMonitor>,
    failed_logins: Mutex<RateMonitor>,
    api_errors: Mutex<RateMonitor>,
    alerts_raised: AtomicU64,
    deliveries_failed: Arc<AtomicU64>,
}

impl RealTimeAlertManager {
    pub fn new(config: AlertConfig, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let phi_access = RateMonitor::new(
            chrono::Duration::hours(1),
            config.phi_access_rate_per_hour + 1,
        );
        let failed_logins = RateMonitor::new(
            chrono::Duration::seconds(config.failed_logins_window_secs),
            config.failed_logins_threshold,
        );
        let api_errors = RateMonitor::new(
            chrono::Duration::minutes(1),
            config.api_error_rate_per_minute + 1,
        );

        info!(
            "Alert manager ready: {} critical events, {} high-risk patterns, {} sinks",
            config.critical_events.len(),
            config.high_risk_patterns.len(),
            sinks.len()
        );

        Self {
            config,
            sinks,
            phi_access: Mutex::new(phi_access),
            failed_logins: Mutex::new(failed_logins),
            api_errors: Mutex::new(api_errors),
            alerts_raised: AtomicU64::new(0),
            deliveries_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised.load(Ordering::SeqCst)
    }

    pub fn deliveries_failed(&self) -> u64 {
        self.deliveries_failed.load(Ordering::SeqCst)
    }

    /// Evaluate an entry against the rule table. Returns the alerts raised;
    /// their delivery continues in the background.
    pub fn process_event(&self, entry: &AuditChainEntry) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let critical_name = self.config.critical_events.iter().any(|e| *e == entry.event_type);
        if entry.risk_level == RiskLevel::Critical || critical_name {
            alerts.push(Alert::for_entry(
                AlertKind::CriticalEvent,
                AlertSeverity::Critical,
                format!("Critical security event: {}", entry.event_type),
                entry,
            ));
        } else if entry.risk_level == RiskLevel::High
            && self.config.high_risk_patterns.iter().any(|p| *p == entry.event_type)
        {
            alerts.push(Alert::for_entry(
                AlertKind::HighRiskPattern,
                AlertSeverity::High,
                format!("High-risk activity: {}", entry.event_type),
                entry,
            ));
        }

        if entry.phi_involved && entry.outcome == Outcome::Success {
            let key = entry.user_id.as_deref().unwrap_or("anonymous");
            if let Some(count) = guard(&self.phi_access).observe(key, entry.created_at) {
                alerts.push(
                    Alert::for_entry(
                        AlertKind::PhiAccessRate,
                        AlertSeverity::High,
                        format!("Unusual PHI access rate for {}", key),
                        entry,
                    )
                    .with_detail("accesses_last_hour", json!(count))
                    .with_detail("threshold", json!(self.config.phi_access_rate_per_hour)),
                );
            }
        }

        if entry.category == EventCategory::Authentication && entry.outcome == Outcome::Failure {
            let key = entry
                .user_id
                .as_deref()
                .or(entry.ip_address.as_deref())
                .unwrap_or("unknown");
            if let Some(count) = guard(&self.failed_logins).observe(key, entry.created_at) {
                alerts.push(
                    Alert::for_entry(
                        AlertKind::BruteForce,
                        AlertSeverity::Critical,
                        format!("Possible brute-force attack against {}", key),
                        entry,
                    )
                    .with_detail("failed_attempts", json!(count))
                    .with_detail("window_secs", json!(self.config.failed_logins_window_secs)),
                );
            }
        }

        if entry.outcome == Outcome::Error {
            if let Some(count) = guard(&self.api_errors).observe("global", entry.created_at) {
                alerts.push(
                    Alert::for_entry(
                        AlertKind::ApiErrorRate,
                        AlertSeverity::Medium,
                        "Elevated API error rate".to_string(),
                        entry,
                    )
                    .with_detail("errors_last_minute", json!(count))
                    .with_detail("threshold", json!(self.config.api_error_rate_per_minute)),
                );
            }
        }

        for alert in &alerts {
            self.alerts_raised.fetch_add(1, Ordering::SeqCst);
            self.dispatch(alert.clone());
        }
        alerts
    }

    fn dispatch(&self, alert: Alert) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; alert {} not delivered", alert.alert_id);
            self.deliveries_failed.fetch_add(1, Ordering::SeqCst);
            return;
        };

        let alert = Arc::new(alert);
        for sink in &self.sinks {
            let sink = sink.clone();
            let alert = alert.clone();
            let failed = self.deliveries_failed.clone();
            let attempts = self.config.delivery_attempts;
            let attempt_timeout = self.config.delivery_timeout();
            let backoff = self.config.retry_backoff();

            runtime.spawn(async move {
                if !deliver_with_retry(sink.as_ref(), &alert, attempts, attempt_timeout, backoff).await
                {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    }
}

async fn deliver_with_retry(
    sink: &dyn AlertSink,
    alert: &Alert,
    attempts: u32,
    attempt_timeout: Duration,
    backoff: Duration,
) -> bool {
    for attempt in 1..=attempts {
        match tokio::time::timeout(attempt_timeout, sink.deliver(alert)).await {
            Ok(true) => {
                debug!("Alert {} delivered via {}", alert.alert_id, sink.name());
                return true;
            }
            Ok(false) => warn!(
                "Alert sink {} rejected alert {} (attempt {}/{})",
                sink.name(),
                alert.alert_id,
                attempt,
                attempts
            ),
            Err(_) => warn!(
                "Alert sink {} timed out on alert {} (attempt {}/{})",
                sink.name(),
                alert.alert_id,
                attempt,
                attempts
            ),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff * 2u32.saturating_pow(attempt - 1)).await;
        }
    }

    error!(
        "Giving up on alert {} via {} after {} attempts",
        alert.alert_id,
        sink.name(),
        attempts
    );
    false
}
