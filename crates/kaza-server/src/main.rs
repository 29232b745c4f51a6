//! KaZa server binary.
//!
//! # Usage
//!
//! ```bash
//! # Standard deployment paths
//! kazad
//!
//! # Everything relocated (development)
//! kazad --config ./kazad.conf --base-dir ./state --log-level debug
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use kaza_server::{
    DisabledSqlBridge, ObjectRegistry, RedbSettings, Server, ServerError, Settings,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// KaZa telemetry/control server
#[derive(Parser, Debug)]
#[command(name = "kazad")]
#[command(about = "KaZa telemetry/control server")]
#[command(version)]
struct Args {
    /// Path to the INI configuration file
    #[arg(short, long, default_value = "/etc/kazad.conf")]
    config: PathBuf,

    /// Directory holding certificates and persisted state
    #[arg(long, default_value = "/var/lib/kazad")]
    base_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("KaZa server starting");

    let settings = Settings::load(&args.config).inspect_err(|e| {
        tracing::error!("{e}");
    })?;

    std::fs::create_dir_all(&args.base_dir)
        .map_err(|e| ServerError::Config(format!("cannot create base directory: {e}")))?;
    let store = Arc::new(RedbSettings::open(args.base_dir.join("settings.redb"))?);

    // The registry is populated by the declarative configuration loader;
    // it plugs in through Server::registry() and Server::settings_store().
    let registry = Arc::new(ObjectRegistry::new());

    if let Some(db) = &settings.database {
        tracing::info!(
            "database bridge configured for driver {} (external collaborator)",
            db.driver
        );
    }
    let sql = Arc::new(DisabledSqlBridge);

    let server = Server::bind(settings, &args.base_dir, registry, store, sql)
        .await
        .inspect_err(|e| {
            tracing::error!("initialisation failed: {e}");
        })?;

    tracing::info!("KaZa server initialised, listening on {}", server.local_addr()?);
    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);

    server.run().await
}
