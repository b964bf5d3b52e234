//! # relayd
//!
//! Relay server binary — parses flags, initializes tracing and the
//! metrics recorder, and runs the HTTP/WebSocket relay until
//! interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::config::ServerConfig;
use relay_server::server::RelayServer;
use tracing_subscriber::EnvFilter;

/// Real-time WebSocket message relay.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "WebSocket message relay server")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Directory of static assets served for non-WebSocket requests.
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,

    /// Skip the originating connection during fan-out (by default a
    /// sender receives its own messages back).
    #[arg(long)]
    exclude_sender: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        public_dir: args.public_dir,
        exclude_sender: args.exclude_sender,
        ..ServerConfig::default()
    };

    let metrics = relay_server::metrics::install_recorder();
    let handle = RelayServer::new(config)
        .with_metrics(metrics)
        .start()
        .await
        .context("failed to start relay server")?;
    tracing::info!(port = handle.port, "relayd running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    handle.stop().await;

    Ok(())
}
