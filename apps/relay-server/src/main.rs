//! relay-server - standalone headless streaming relay and fan-out server.
//!
//! Loads a YAML configuration (§6), applies it to build the initial set of
//! relays and handlers, and serves the mount/status HTTP surface until a
//! shutdown signal arrives. `SIGHUP` (or `--reload-on-sighup`'s absence
//! notwithstanding) re-reads the configuration file and converges the live
//! relay set onto it without dropping unaffected mounts (§4.7).

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use relay_core::{AppState, ReconfigurationEngine, ServerRegistry};
use tokio::signal;

/// Headless streaming relay and fan-out server.
#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the relay configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "RELAY_CONFIG")]
    config: PathBuf,

    /// Address to bind the client-facing HTTP listener to.
    #[arg(short, long, value_name = "ADDR", env = "RELAY_BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("relay-server v{}", env!("CARGO_PKG_VERSION"));

    let initial_config = config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let bind_addr = config::resolve_bind_addr(args.bind)?;

    let registry = ServerRegistry::new(initial_config.clients_limit);
    let engine = ReconfigurationEngine::new(Arc::clone(&registry));
    let state = AppState {
        registry: Arc::clone(&registry),
        engine: Arc::clone(&engine),
        handlers: Arc::new(RwLock::new(Default::default())),
        config: Arc::new(RwLock::new(initial_config)),
    };

    {
        let config = state.config.read().clone();
        state
            .apply_config(config)
            .await
            .context("failed to apply initial configuration")?;
    }
    log::info!(
        "configured {} mount(s), {} relay(s) starting",
        state.config.read().mounts.len(),
        registry.relay_count()
    );

    let server_state = state.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = relay_core::start_server(server_state, bind_addr).await {
            log::error!("server error: {e}");
        }
    });

    let reload_state = state.clone();
    let config_path = args.config.clone();
    tokio::spawn(async move {
        reload_on_sighup(reload_state, config_path).await;
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, closing relays");

    for key in registry.running_relay_keys() {
        if let Some(handle) = registry.get_relay(&key) {
            handle.close();
        }
    }
    server_task.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Watches for `SIGHUP` and reloads the configuration file on receipt,
/// converging the live relay set via the reconfiguration engine (§4.7). A
/// malformed reload leaves the previous configuration running untouched.
#[cfg(unix)]
async fn reload_on_sighup(state: AppState, config_path: PathBuf) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("failed to install SIGHUP handler: {e}");
            return;
        }
    };
    loop {
        if hangup.recv().await.is_none() {
            return;
        }
        log::info!("SIGHUP received, reloading {}", config_path.display());
        match config::load(&config_path) {
            Ok(new_config) => match state.apply_config(new_config).await {
                Ok(()) => log::info!("reconfiguration applied"),
                Err(e) => log::error!("reconfiguration rejected: {e}"),
            },
            Err(e) => log::error!("failed to reload {}: {e}", config_path.display()),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_sighup(_state: AppState, _config_path: PathBuf) {
    std::future::pending::<()>().await;
}

/// Waits for a shutdown signal (Ctrl+C or `SIGTERM`).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
