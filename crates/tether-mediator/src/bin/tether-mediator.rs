//! Standalone tether mediator

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tether_core::{TetherConfig, TetherError};
use tether_mediator::{MediatorConfig, MediatorServer};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "tether-mediator")]
#[command(about = "Rendezvous mediator for tether peers", long_about = None)]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let mut config =
        MediatorConfig::load(cli.config.as_deref()).context("loading mediator configuration")?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let server = MediatorServer::with_builtin_techniques(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received"),
            Err(error) => {
                tracing::error!(error = %TetherError::from(error), "Cannot listen for interrupts");
                // Dropping the sender would stop the server
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;
    Ok(())
}
