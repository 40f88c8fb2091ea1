//! Health Report Daemon
//!
//! Listens for report requests on a Unix socket and answers each one with a
//! health report document.

use anyhow::{Context, Result};
use clap::Parser;
use healthreport_common::{JsonPrefsStore, SystemClock};
use healthreportd::bridge::{EventBridge, LocalBridge};
use healthreportd::config::Config;
use healthreportd::context::ExecutionContext;
use healthreportd::engine::EngineParts;
use healthreportd::generator::HealthReportGenerator;
use healthreportd::profile::DirectoryProfile;
use healthreportd::reporter::{HealthReporter, ReporterSettings};
use healthreportd::storage::SqliteStorageProvider;
use healthreportd::transport;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "healthreportd")]
#[command(about = "Health report daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the system config)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Health Report Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let context = ExecutionContext::current(&config.daemon.app_dir)?;
    let clock = Arc::new(SystemClock);
    let provider = Arc::new(SqliteStorageProvider::new());
    let generator = HealthReportGenerator::new(clock.clone())
        .with_earliest_last_ping(config.report.earliest_last_ping_ms);

    let parts = EngineParts {
        storage: provider.clone(),
        generator: Arc::new(generator),
        prefs: Arc::new(JsonPrefsStore::new(&config.prefs.path)),
        profiles: Arc::new(DirectoryProfile::new(&config.profile.path)),
        clock,
        policy: config.report.window_policy(),
    };

    let bridge = Arc::new(LocalBridge::with_capacity(config.report.outbound_capacity()));
    let reporter = Arc::new(HealthReporter::new(
        Some(context),
        parts,
        bridge.clone() as Arc<dyn EventBridge>,
        ReporterSettings::from(&config.report),
    )?);
    reporter.start();

    let listener = transport::bind(&config.daemon.socket_path)
        .await
        .context("Failed to start transport")?;

    info!("Health Report Daemon ready");

    tokio::select! {
        result = transport::serve(listener, bridge) => {
            if let Err(e) = result {
                error!("Transport stopped: {:#}", e);
            }
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down gracefully");
        }
    }

    reporter.shutdown();
    provider.close();
    let _ = std::fs::remove_file(&config.daemon.socket_path);

    Ok(())
}
