use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{AuditError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub database_url: String,
    pub signing: SigningConfig,
    pub event_bus: EventBusConfig,
    pub alerts: AlertConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://audit_chain.db".to_string(),
            signing: SigningConfig::default(),
            event_bus: EventBusConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// File holding the hex-encoded active secret key
    pub signing_key_path: Option<String>,
    /// Hex-encoded active secret key, usually injected from a secret store
    pub signing_key_hex: Option<String>,
    /// Hex-encoded public keys of retired signing keys
    pub retired_public_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Bounded queue size; publishers wait when it is full
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub drain_grace_ms: u64,
    pub max_error_events_per_sec: u32,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            poll_interval_ms: 1_000,
            drain_grace_ms: 1_000,
            max_error_events_per_sec: 20,
        }
    }
}

impl EventBusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub critical_events: Vec<String>,
    pub high_risk_patterns: Vec<String>,
    pub failed_logins_threshold: usize,
    pub failed_logins_window_secs: i64,
    pub phi_access_rate_per_hour: usize,
    pub api_error_rate_per_minute: usize,
    pub delivery_timeout_ms: u64,
    pub delivery_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            critical_events: [
                "unauthorized_access",
                "data_breach",
                "privilege_escalation",
                "audit_log_tampering",
                "encryption_failure",
                "mass_phi_export",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            high_risk_patterns: [
                "multiple_failed_logins",
                "unusual_access_time",
                "bulk_data_export",
                "permission_change",
                "phi_access_outside_role",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            failed_logins_threshold: 5,
            failed_logins_window_secs: 15 * 60,
            phi_access_rate_per_hour: 100,
            api_error_rate_per_minute: 50,
            delivery_timeout_ms: 5_000,
            delivery_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl AlertConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl AuditConfig {
    /// Load configuration: optional TOML file from `AUDIT_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match env::var("AUDIT_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(url) = env::var("AUDIT_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(path) = env::var("AUDIT_SIGNING_KEY_PATH") {
            config.signing.signing_key_path = Some(path);
        }
        if let Ok(secret) = env::var("AUDIT_SIGNING_KEY") {
            config.signing.signing_key_hex = Some(secret);
        }
        if let Ok(keys) = env::var("AUDIT_RETIRED_PUBLIC_KEYS") {
            config.signing.retired_public_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(capacity) = env::var("AUDIT_BUS_QUEUE_CAPACITY") {
            config.event_bus.queue_capacity = capacity.parse().map_err(|e| {
                AuditError::Config(format!("Invalid AUDIT_BUS_QUEUE_CAPACITY: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        info!("Loading audit configuration from: {:?}", path);

        let contents = fs::read_to_string(path)
            .map_err(|e| AuditError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(AuditError::Config("database_url must not be empty".to_string()));
        }
        if self.event_bus.queue_capacity == 0 {
            return Err(AuditError::Config(
                "event_bus.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.alerts.delivery_attempts == 0 {
            return Err(AuditError::Config(
                "alerts.delivery_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
