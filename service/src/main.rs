//! `booster-service` entry point.
//!
//! Loads the configuration, opens every pool service's identifier database
//! and serves REDCap Data Entry Triggers until Ctrl+C.

use std::path::PathBuf;

use anyhow::Context;
use booster_service::{AppState, BoosterConfig, RedcapClient, Registry};
use clap::Parser;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(version, about = "REDCap Booster webhook service")]
struct Args {
    /// Configuration file (defaults to $BOOSTER_CONFIG or
    /// ~/.config/redcap-booster/booster.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!("booster-service v{} starting", env!("CARGO_PKG_VERSION"));

    let config = BoosterConfig::load(args.config.as_deref()).context("loading configuration")?;
    let redcap = RedcapClient::from_config(&config)?;
    let registry = Registry::from_config(&config, &redcap).context("building integrations")?;
    if registry.is_empty() {
        tracing::warn!("no services configured; every notification will be refused");
    }

    let listen = args.listen.unwrap_or_else(|| config.listen.clone());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!("listening on http://{listen}");

    let state = AppState::new(registry, &config, redcap.base_url());

    // Shutdown coordination via watch channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    booster_service::serve(state, listener, shutdown_rx).await?;

    tracing::info!("booster-service exiting cleanly");
    Ok(())
}
