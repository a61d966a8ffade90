#![warn(missing_docs)]

//! Hyperspace master daemon.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hyperspace_master::{server, Master, MasterConfig, MemoryKvStore};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "hyperspace-master", about = "Hyperspace coordination master")]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, short, env = "HYPERSPACE_CONFIG", default_value = "/etc/hyperspace/master.toml")]
    config: PathBuf,

    /// Override the listen address
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        MasterConfig::from_file(&cli.config)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
        MasterConfig::default()
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let master = Arc::new(Master::recover(config.lease(), Arc::new(MemoryKvStore::new()))?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = Arc::new(shutdown_tx);

    let reaper = master.spawn_reaper(config.reaper_interval(), shutdown_rx);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Hyperspace master listening");

    let server_handle = tokio::spawn(server::serve(
        Arc::clone(&master),
        listener,
        config.max_frame_len,
        Arc::clone(&shutdown),
    ));

    let mut stopped = shutdown.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
        _ = stopped.changed() => {}
    }
    shutdown.send_replace(true);

    server_handle.await??;
    let _ = reaper.await;
    master.flush().await;

    if master.is_failed() {
        anyhow::bail!("master halted after an internal invariant violation");
    }
    tracing::info!("Hyperspace master stopped");
    Ok(())
}
