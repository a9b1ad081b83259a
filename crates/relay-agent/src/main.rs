//! # relay-agent
//!
//! Relay bridge binary — loads settings, wires the in-memory host
//! collaborators to a socket connector, and runs one bridge session until
//! interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_host::{MemoryEventBus, MemoryLifecycle, MemoryServiceRegistry, MemoryStateStore};
use relay_session::{Session, WsConnector};
use relay_settings::load_settings_from_path;

/// Relay bridge.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Relay bridge to a remote automation instance")]
struct Cli {
    /// Bridge instance name, used for the derived client identifier.
    #[arg(long, default_value = "relay")]
    name: String,

    /// Path to the settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let path = cli.settings.unwrap_or_else(relay_settings::settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    let connector =
        Arc::new(WsConnector::from_settings(&settings).context("invalid transport settings")?);

    let session = Session::new(
        &cli.name,
        settings,
        connector,
        Arc::new(MemoryServiceRegistry::new()),
        Arc::new(MemoryEventBus::new()),
        Arc::new(MemoryStateStore::new()),
        Arc::new(MemoryLifecycle::new()),
    )
    .context("invalid namespace mapping")?;

    tracing::info!(
        name = %cli.name,
        client_id = %session.client_id(),
        namespace = session.namespace(),
        "starting bridge"
    );

    let runner = session.clone();
    let run = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    session.stop().await;
    run.await.context("bridge task panicked")?;

    tracing::info!("shutdown complete");
    Ok(())
}
