//! Standalone real-time telephony/AI voice bridge server.
//!
//! Thin process entry point: load configuration, bootstrap the shared
//! services, bind the WebSocket listeners, and shut down gracefully on
//! Ctrl+C or SIGTERM.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use crate::config::FileConfig;

/// Real-time telephony/AI voice bridge.
#[derive(Parser, Debug)]
#[command(name = "bridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "BRIDGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Address to bind the telephony/observer listener to (overrides config file).
    #[arg(short = 'b', long, env = "BRIDGE_BIND_ADDR")]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("bridge-server v{}", env!("CARGO_PKG_VERSION"));

    let mut file_config =
        FileConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind_addr) = args.bind_addr {
        file_config.bind_addr = bind_addr;
    }

    let core_config = file_config.to_core_config();
    let ctx = Arc::new(
        bridge_core::bootstrap::bootstrap_services(core_config)
            .context("failed to bootstrap bridge services")?,
    );

    log::info!("services bootstrapped, {} active sessions", ctx.registry.session_count());

    let bind_addr = ctx.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    log::info!("listening on {bind_addr}");

    let app = bridge_core::server::router(Arc::clone(&ctx));
    let server_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app.into_make_service()).await {
            log::error!("server error: {err}");
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up...");

    ctx.begin_shutdown();
    tokio::time::sleep(std::time::Duration::from_secs(
        ctx.config.session_destroy_grace_secs,
    ))
    .await;
    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
