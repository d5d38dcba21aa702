//! bucketsyncd - bidirectional file/bucket synchronization daemon
//!
//! Runs every workflow of one YAML configuration file:
//! - Outbound: files written into a watched directory are uploaded to an
//!   S3-compatible bucket or a WebDAV collection
//! - Inbound: object notifications consumed from AMQP are downloaded into a
//!   local directory
//!
//! SIGINT and SIGTERM cancel a shared `CancellationToken`; the supervisor then
//! stops every workflow before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bucketsync_amqp::AmqpBroker;
use bucketsync_core::config::Config;
use bucketsync_storage::DefaultStorageConnector;
use bucketsync_sync::Supervisor;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "bucketsyncd",
    version,
    about = "Synchronize local directories with object storage buckets"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

// ============================================================================
// Logging
// ============================================================================

/// Filter directives: `RUST_LOG` when set, otherwise the configured level.
fn filter_directives(rust_log: Option<String>, log_level: &str) -> String {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| log_level.to_string())
}

fn init_tracing(config: &Config) {
    let directives = filter_directives(std::env::var("RUST_LOG").ok(), &config.log_level);
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logs every validation error and fails if there was any.
fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    for e in &errors {
        error!(field = %e.field, message = %e.message, "Invalid configuration");
    }
    if !errors.is_empty() {
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }
    Ok(())
}

// ============================================================================
// Graceful shutdown
// ============================================================================

/// Waits for SIGINT or SIGTERM and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    init_tracing(&config);
    ensure_valid(&config)?;

    if cli.check {
        info!(
            config = %cli.config.display(),
            outbound = config.outbound.len(),
            inbound = config.inbound.len(),
            remotes = config.remotes.len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "bucketsyncd starting"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let supervisor = Supervisor::new(
        config,
        Arc::new(DefaultStorageConnector::new()),
        Arc::new(AmqpBroker::new()),
        shutdown,
    );

    let result = supervisor
        .run()
        .await
        .context("Failed to start workflows");

    match &result {
        Ok(()) => info!("bucketsyncd shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "bucketsyncd exiting with error"),
    }

    result
}
