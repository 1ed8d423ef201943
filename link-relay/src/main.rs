//! devlink-relay binary entry point.
//!
//! Usage:
//! ```bash
//! devlink-relay --config devlink.toml
//! devlink-relay --bind 127.0.0.1:5268
//! devlink-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use devlink_relay::cleanup::spawn_cleanup_task;
use devlink_relay::http::{build_router, health};
use devlink_relay::{Config, Hub};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Rendezvous and relay hub for devices.
#[derive(Parser, Debug)]
#[command(name = "devlink-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when it does not exist)
    #[arg(long, short, env = "DEVLINK_CONFIG", default_value = "devlink.toml")]
    config: PathBuf,

    /// Override the listen address from the configuration file
    #[arg(long, env = "DEVLINK_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    health::init_start_time();

    let bind_address = config.server.bind_address.clone();
    let cleanup_config = config.cleanup.clone();
    let hub = Arc::new(Hub::new(config));

    let cleanup = spawn_cleanup_task(hub.clone(), cleanup_config);
    let app = build_router(hub);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;
    tracing::info!("devlink-relay v{} listening on {}", env!("CARGO_PKG_VERSION"), bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cleanup.abort();
    tracing::info!("devlink-relay shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
