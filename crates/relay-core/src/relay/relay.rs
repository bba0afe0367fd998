//! Relay: upstream ingress state machine shared shape for the UDP and HTTP
//! variants (§4.5, §4.6).
//!
//! The concrete per-variant reconnect loops live in [`super::udp`] and
//! [`super::http`]; this module holds the parts the reconfiguration engine
//! and registry need regardless of variant: the identity key, the live
//! mutable parameters reconfiguration mutates in place, and the
//! cancellation handle used for idempotent closure.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::publisher::Publisher;
use super::url::RelayUrl;

/// Effective, per-relay configuration (inherited-and-overridden from mount
/// and root config defaults, §6) needed to respawn a relay after a
/// scheduled restart.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub burst_bytes: usize,
    pub keepalive_secs: Option<u64>,
    pub on_demand: bool,
    pub max_queue_size: Option<usize>,
}

/// Identity of a running or desired relay: the tuple the reconfiguration
/// engine diffs on (§4.7 step 2/4). `addr` distinguishes the one-relay-per-
/// resolved-address fan-out from `net_resolve_all` (§4.7 `configure_relays`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayKey {
    pub url: String,
    pub path: String,
    pub addr: Option<SocketAddr>,
}

/// Diagnostic state label (§4.5, §4.6). Tokio's own scheduler drives actual
/// suspension; this enum exists so logs and the status page can describe
/// what a relay is doing, preserving the design's transition vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Requesting,
    ReadingResponse,
    Streaming,
    /// UDP-only: accumulating the warmup prefix buffer.
    Warmup,
    /// HTTP on-demand only: socket closed, metadata retained.
    Idle,
    Closed,
}

/// Live, reconfigurable relay parameters (§4.7 step 4: "update `r.burst_size`
/// and `r.keepalive`").
pub struct RelayHandle {
    pub key: RelayKey,
    pub on_demand: bool,
    pub max_queue_size: Option<usize>,
    burst_bytes: AtomicUsize,
    keepalive_secs: RwLock<Option<u64>>,
    state: RwLock<RelayState>,
    publisher: RwLock<Option<Arc<Publisher>>>,
    cancel: CancellationToken,
    /// Woken by [`Self::request_connect`] when a subscriber arrives for an
    /// `on_demand` relay sitting in `Idle` (§4.6).
    demand: Notify,
}

impl RelayHandle {
    #[must_use]
    pub fn new(
        key: RelayKey,
        burst_bytes: usize,
        keepalive_secs: Option<u64>,
        on_demand: bool,
        max_queue_size: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            on_demand,
            max_queue_size,
            burst_bytes: AtomicUsize::new(burst_bytes),
            keepalive_secs: RwLock::new(keepalive_secs),
            state: RwLock::new(RelayState::Connecting),
            publisher: RwLock::new(None),
            cancel: CancellationToken::new(),
            demand: Notify::new(),
        })
    }

    /// Wakes an `on_demand` relay parked in `Idle` so it starts connecting
    /// (§4.6 "returns to `Connecting` when a first subscriber arrives").
    /// A no-op (but harmless) call on a relay that isn't currently idle.
    pub fn request_connect(&self) {
        self.demand.notify_one();
    }

    /// Awaits the next [`Self::request_connect`] call.
    pub async fn wait_for_demand(&self) {
        self.demand.notified().await;
    }

    #[must_use]
    pub fn parsed_url(&self) -> Result<RelayUrl, crate::error::RelayError> {
        RelayUrl::parse(&self.key.url)
    }

    #[must_use]
    pub fn burst_bytes(&self) -> usize {
        self.burst_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive_secs.read().map(Duration::from_secs)
    }

    #[must_use]
    pub fn keepalive_secs(&self) -> Option<u64> {
        *self.keepalive_secs.read()
    }

    #[must_use]
    pub fn state(&self) -> RelayState {
        *self.state.read()
    }

    pub fn set_state(&self, state: RelayState) {
        *self.state.write() = state;
    }

    #[must_use]
    pub fn publisher(&self) -> Option<Arc<Publisher>> {
        self.publisher.read().clone()
    }

    pub fn set_publisher(&self, publisher: Option<Arc<Publisher>>) {
        *self.publisher.write() = publisher;
    }

    /// Applies new effective values in place without restarting the relay
    /// (§4.7 step 4).
    pub fn reconfigure(&self, burst_bytes: usize, keepalive_secs: Option<u64>) {
        self.burst_bytes.store(burst_bytes, Ordering::Relaxed);
        *self.keepalive_secs.write() = keepalive_secs;
        if let Some(publisher) = self.publisher() {
            publisher.reconfigure(burst_bytes, keepalive_secs.map(Duration::from_secs));
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent: safe to call multiple times and safe during dispatch for
    /// the same handler (§5).
    pub fn close(&self) {
        self.cancel.cancel();
        self.set_state(RelayState::Closed);
        if let Some(publisher) = self.publisher() {
            publisher.close();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_idempotent() {
        let handle = RelayHandle::new(
            RelayKey {
                url: "http://o/".into(),
                path: "/m".into(),
                addr: None,
            },
            1024,
            None,
            false,
            None,
        );
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(handle.state(), RelayState::Closed);
    }

    #[test]
    fn reconfigure_updates_live_parameters_and_attached_publisher() {
        let handle = RelayHandle::new(
            RelayKey {
                url: "http://o/".into(),
                path: "/m".into(),
                addr: None,
            },
            1024,
            Some(30),
            false,
            None,
        );
        let publisher = Arc::new(Publisher::new(
            "/m",
            None,
            "video/MP2T",
            super::super::demuxer::DemuxerKind::Raw,
            1024,
            Some(Duration::from_secs(30)),
        ));
        handle.set_publisher(Some(Arc::clone(&publisher)));

        handle.reconfigure(2048, None);
        assert_eq!(handle.burst_bytes(), 2048);
        assert_eq!(handle.keepalive_secs(), None);
    }
}
