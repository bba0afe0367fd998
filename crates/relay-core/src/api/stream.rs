//! Mount GET handler: the subscriber side of the fan-out (§4.4, §4.8).
//!
//! A request against a path that isn't a configured status endpoint is
//! treated as a mount name: the auth chain runs, the global client limit is
//! checked, an on-demand relay is nudged awake if the mount has no live
//! publisher yet, and — once one is attached — the response body streams
//! the publisher's burst-queue snapshot followed by everything fanned out
//! after it, with no gap and no duplicates (§5), until overflow or
//! disconnect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, Stream};
use futures::StreamExt;
use tokio::sync::broadcast;

use super::{status, AppState};
use crate::protocol_constants::{APP_NAME, ICY_METAINT, ON_DEMAND_CONNECT_TIMEOUT_SECS};
use crate::relay::demuxer::Chunk;
use crate::relay::publisher::Subscription;
use crate::relay::sink::lagged_error;
use crate::relay::{Publisher, ServerRegistry};
use crate::stream::{IcyMetadataInjector, StreamMetadata};

pub(super) async fn root_handler(
    state: State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    dispatch(state, "/".to_string(), peer, headers).await
}

pub(super) async fn mount_handler(
    Path(path): Path<String>,
    state: State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    dispatch(state, path, peer, headers).await
}

async fn dispatch(
    State(state): State<AppState>,
    path: String,
    peer: SocketAddr,
    headers: HeaderMap,
) -> Response {
    {
        let handlers = state.handlers.read();
        if let Some(resp) = status::render(&handlers, &state.registry, &path) {
            return resp;
        }
    }

    if !state.registry.try_acquire_client() {
        return (StatusCode::SERVICE_UNAVAILABLE, "client limit reached").into_response();
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let authorized = state.handlers.read().authorize(&path, auth_header);
    if !authorized {
        state.registry.release_client();
        return (StatusCode::FORBIDDEN, "auth denied").into_response();
    }

    let publisher = match acquire_publisher(&state.registry, &path).await {
        Some(p) => p,
        None => {
            state.registry.release_client();
            return (StatusCode::NOT_FOUND, "mount not found").into_response();
        }
    };

    let sub = publisher.attach(Some(peer));
    let wants_icy = headers
        .get("icy-metadata")
        .and_then(|v| v.to_str().ok())
        == Some("1");

    build_response(&state.registry, &path, Arc::clone(&publisher), sub, wants_icy)
}

/// Finds a live publisher for `path`, nudging any on-demand relays
/// configured for it awake and waiting briefly for one to register (§4.6).
async fn acquire_publisher(registry: &Arc<ServerRegistry>, path: &str) -> Option<Arc<Publisher>> {
    if let Some(p) = registry.pick_publisher(path) {
        return Some(p);
    }
    let relays = registry.relays_for_path(path);
    if relays.is_empty() {
        return None;
    }
    for relay in &relays {
        relay.request_connect();
    }
    registry
        .wait_for_publisher(path, Duration::from_secs(ON_DEMAND_CONNECT_TIMEOUT_SECS))
        .await
}

/// Releases the client slot and detaches the subscriber when the response
/// body is dropped, whether the stream ran to completion or the connection
/// was cut short.
struct SubscriberGuard {
    registry: Arc<ServerRegistry>,
    publisher: Arc<Publisher>,
    id: u64,
    mount: String,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.publisher.detach(self.id);
        self.registry.release_client();
        log::debug!("[Server] subscriber {} on {} disconnected", self.id, self.mount);
    }
}

struct StreamState {
    prefill: std::vec::IntoIter<Bytes>,
    rx: broadcast::Receiver<Arc<Chunk>>,
    queue_depth: Arc<AtomicUsize>,
    mount: String,
    done: bool,
    _guard: SubscriberGuard,
}

/// Builds the ordered byte stream a subscriber is replayed: the burst-queue
/// snapshot taken at attach time, then every chunk fanned out after it, with
/// no gaps or duplicates (§5), terminating on the first overflow.
fn subscriber_stream(
    registry: Arc<ServerRegistry>,
    publisher: Arc<Publisher>,
    mount: String,
    sub: Subscription,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let state = StreamState {
        prefill: sub.prefill.into_iter(),
        rx: sub.rx,
        queue_depth: sub.queue_depth,
        mount: mount.clone(),
        done: false,
        _guard: SubscriberGuard {
            registry,
            publisher,
            id: sub.id,
            mount,
        },
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        if let Some(chunk) = state.prefill.next() {
            return Some((Ok(chunk), state));
        }
        match state.rx.recv().await {
            Ok(chunk) => {
                state
                    .queue_depth
                    .store(state.rx.len(), Ordering::Relaxed);
                Some((Ok(chunk.bytes.clone()), state))
            }
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                let err = lagged_error(&state.mount, skipped);
                state.done = true;
                Some((Err(err), state))
            }
        }
    })
}

fn build_response(
    registry: &Arc<ServerRegistry>,
    mount: &str,
    publisher: Arc<Publisher>,
    sub: Subscription,
    wants_icy: bool,
) -> Response {
    let content_type = publisher.content_type.clone();
    let raw = subscriber_stream(Arc::clone(registry), Arc::clone(&publisher), mount.to_string(), sub);

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "close")
        .header("icy-name", APP_NAME);

    let body = if wants_icy {
        builder = builder.header("icy-metaint", ICY_METAINT.to_string());
        let mut injector = IcyMetadataInjector::new();
        let metadata = StreamMetadata::default();
        Body::from_stream(raw.map(move |res| {
            res.map(|chunk| injector.inject(chunk.as_ref(), &metadata))
        }))
    } else {
        Body::from_stream(raw)
    };

    builder.body(body).unwrap_or_else(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to build response: {e}"),
        )
            .into_response()
    })
}
