use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use compliance_audit::config::AuditConfig;
use compliance_audit::database::SqliteAuditStore;
use compliance_audit::AuditContext;

/// Entries checked by the startup integrity sweep
const STARTUP_VERIFY_LIMIT: usize = 10_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compliance_audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting compliance audit service");

    let config = AuditConfig::load()?;
    info!("Configuration loaded");

    let store = SqliteAuditStore::connect(&config.database_url).await?;
    store.run_migrations().await?;
    info!("Audit store ready at {}", config.database_url);

    let context = AuditContext::new(&config, Arc::new(store))?;

    let report = context.audit.verify_integrity(STARTUP_VERIFY_LIMIT).await;
    if report.is_valid() {
        info!("Startup integrity check: {}", report.summary());
    } else {
        error!("Startup integrity check FAILED: {}", report.summary());
    }
    for record in context.crypto.export_public_keys()? {
        info!(
            "Verification key {} (active: {}): {}",
            record.key_id, record.active, record.public_key
        );
    }

    context.start().await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    context.shutdown().await;
    Ok(())
}
