//! Server Core (§4.8): accept loop, mount routing, status pages, and the
//! axum HTTP surface the relay/fan-out core is served behind.
//!
//! The listening socket and per-connection HTTP parsing are handled by
//! `axum`/`hyper` rather than the hand-rolled event loop of §4.1 — that
//! collaborator is explicitly out of scope (§1 "the HTTP wire parser").
//! What lives here is everything the design actually specifies: registry
//! lookup by mount path, auth-chain short-circuiting, the global client
//! limit, and status/statistics handler dispatch.

mod status;
mod stream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::config::{Config, ReconfigurationEngine};
use crate::handlers::{ActiveHandlers, StatusReport};
use crate::protocol_constants::INACTIVITY_SWEEP_INTERVAL_SECS;
use crate::relay::ServerRegistry;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    /// The server's accept loop errored out.
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Shared application state for the API layer (§3 `ServerRegistry`, §4.8).
///
/// Cloning is cheap: every field is an `Arc`, matching the way a single
/// registry/engine pair is shared across every axum worker task.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServerRegistry>,
    pub engine: Arc<ReconfigurationEngine>,
    pub handlers: Arc<RwLock<ActiveHandlers>>,
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    /// Applies `config`, swapping in the freshly built handler set. Used for
    /// both the initial configuration load and any later reconfiguration
    /// (§4.7).
    pub async fn apply_config(&self, config: Config) -> Result<(), crate::error::RelayError> {
        let previous = std::mem::take(&mut *self.handlers.write());
        let handlers = self.engine.apply(&config, Some(previous)).await?;
        *self.handlers.write() = handlers;
        self.registry.set_clients_limit(config.clients_limit);
        *self.config.write() = config;
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", get(stream::mount_handler))
        .route("/", get(stream::root_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawns the periodic inactivity sweep (§4.1, §4.8): closes any subscriber
/// or relay whose idleness exceeds its per-type timeout, drains due
/// scheduled-restart entries re-starting those relays, and feeds a fresh
/// status snapshot to the configured statistics sinks (§6) so they observe
/// the server's state independent of anyone hitting a status page.
fn spawn_inactivity_sweep(
    registry: Arc<ServerRegistry>,
    engine: Arc<ReconfigurationEngine>,
    handlers: Arc<RwLock<ActiveHandlers>>,
) {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(INACTIVITY_SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            registry.sweep_publishers();
            for key in registry.drain_due_restarts() {
                engine.restart(&key).await;
            }
            let report = StatusReport::snapshot(&registry);
            handlers.read().record(&report);
        }
    });
}

/// Binds `bind_addr` and serves the relay/fan-out HTTP surface until the
/// process shuts down. Also starts the background inactivity sweep.
pub async fn start_server(state: AppState, bind_addr: SocketAddr) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ServerError::Bind(bind_addr, e))?;

    spawn_inactivity_sweep(
        Arc::clone(&state.registry),
        Arc::clone(&state.engine),
        Arc::clone(&state.handlers),
    );

    log::info!("[Server] listening on http://{bind_addr}");
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(ServerError::Serve)
}
