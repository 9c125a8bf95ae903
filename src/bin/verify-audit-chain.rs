use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use compliance_audit::audit::{AuditChainManager, ChainVerificationReport};
use compliance_audit::config::SigningConfig;
use compliance_audit::crypto::{CryptographicIntegrityManager, SigningKeyRing};
use compliance_audit::database::SqliteAuditStore;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("verify-audit-chain")
        .version("0.1.0")
        .about("Verify compliance audit chain integrity")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .env("AUDIT_DATABASE_URL")
                .help("SQLite URL of the audit store")
                .required(true),
        )
        .arg(
            Arg::new("limit")
                .short('n')
                .long("limit")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .default_value("10000")
                .help("Number of entries to verify, oldest first"),
        )
        .arg(
            Arg::new("public-key")
                .short('k')
                .long("public-key")
                .value_name("HEX")
                .action(ArgAction::Append)
                .help("Hex-encoded public key of a signing key (repeatable)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the full report as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let database_url = matches
        .get_one::<String>("database-url")
        .ok_or_else(|| anyhow!("--database-url is required"))?;
    let limit = matches.get_one::<usize>("limit").copied().unwrap_or(10_000);
    let public_keys: Vec<String> = matches
        .get_many::<String>("public-key")
        .map(|keys| keys.cloned().collect())
        .unwrap_or_default();
    let json = matches.get_flag("json");
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let report = verify_chain(database_url, limit, public_keys).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report, verbose);
    }

    if !report.is_valid() {
        error!("Audit chain verification failed: {}", report.summary());
        std::process::exit(1);
    }
    Ok(())
}

async fn verify_chain(
    database_url: &str,
    limit: usize,
    public_keys: Vec<String>,
) -> Result<ChainVerificationReport> {
    info!("Verifying audit chain: {}", database_url);

    let store = SqliteAuditStore::connect(database_url).await?;

    // Verification only needs public keys; the throwaway active key never signs.
    let mut keys = SigningKeyRing::load(&SigningConfig::default())?;
    for public_hex in &public_keys {
        let key_id = keys.retain_public_key_hex(public_hex)?;
        info!("Loaded verification key {}", key_id);
    }

    let crypto = Arc::new(CryptographicIntegrityManager::new(keys));
    let chain = AuditChainManager::new(Arc::new(store), crypto);
    Ok(chain.verify_range(limit).await)
}

fn print_report(report: &ChainVerificationReport, verbose: bool) {
    println!("{}", report.summary());

    if verbose {
        for brk in &report.chain_breaks {
            println!(
                "  chain break at {} (position {}): expected previous {}, found {}",
                brk.entry_id, brk.position, brk.expected_previous, brk.actual_previous
            );
        }
        for err in &report.integrity_errors {
            println!(
                "  {:?} in {}: expected {}, found {}",
                err.kind, err.entry_id, err.expected, err.actual
            );
        }
        for err in &report.signature_errors {
            println!(
                "  invalid signature on {} (key {})",
                err.entry_id, err.signing_key_id
            );
        }
    }

    if report.is_valid() {
        println!("✓ Audit chain verification completed successfully");
    }
}
