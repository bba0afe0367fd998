//! Publisher (a.k.a. Source): one active inbound stream for a mount.
//!
//! Owns its burst queue and fans chunks out to subscribers via a broadcast
//! channel, holding the burst lock across snapshot-and-subscribe so a newly
//! attached subscriber can never miss a chunk or see one twice.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::burst::BurstQueue;
use super::demuxer::{Chunk, Demuxer, DemuxerKind};

/// Publisher lifecycle state (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    /// Actively receiving bytes from its upstream relay or push publisher.
    Receiving,
    /// Upstream ended but a keepalive window is still open; subscribers are
    /// retained in case the relay reconnects.
    Draining,
    /// Terminal; subscribers have been (or are being) detached.
    Closed,
}

/// Default broadcast channel capacity (in chunks, not bytes) backing
/// subscriber fan-out. A lagging subscriber is dropped by the channel itself
/// once it falls this many chunks behind — the realization of a
/// subscriber's `Qmax` (§4.2).
pub const DEFAULT_FANOUT_CAPACITY: usize = 256;

/// What [`Publisher::attach`] hands back to a newly-attached subscriber.
pub struct Subscription {
    pub id: u64,
    pub prefill: Vec<Bytes>,
    pub rx: broadcast::Receiver<Arc<Chunk>>,
    pub queue_depth: Arc<AtomicUsize>,
}

/// Active inbound stream for one mount.
pub struct Publisher {
    pub mount: String,
    pub peer_addr: Option<SocketAddr>,
    pub content_type: String,
    demuxer: Mutex<Box<dyn Demuxer>>,
    burst: RwLock<BurstQueue>,
    tx: broadcast::Sender<Arc<Chunk>>,
    subscriber_count: AtomicUsize,
    pub keepalive: RwLock<Option<Duration>>,
    last_activity: RwLock<Instant>,
    state: RwLock<PublisherState>,
    next_subscriber_id: AtomicU64,
    /// Each subscriber's current broadcast backlog, updated by the consuming
    /// task itself by storing into the `Arc<AtomicUsize>` handed back from
    /// [`Self::attach`]. Surfaced on the status page as the per-subscriber
    /// output queue size statistics (§6).
    subscriber_queues: DashMap<u64, Arc<AtomicUsize>>,
    /// Peer address per live subscriber id, for the status page's
    /// mount -> source -> client tree (§6). The subscriber id stands in for
    /// the source's "client fd" — a Rust server has no portable, meaningful
    /// raw fd to expose, so the opaque attach-order id plays that role.
    subscriber_addrs: DashMap<u64, SocketAddr>,
}

impl Publisher {
    #[must_use]
    pub fn new(
        mount: impl Into<String>,
        peer_addr: Option<SocketAddr>,
        content_type: impl Into<String>,
        demuxer_kind: DemuxerKind,
        burst_bytes: usize,
        keepalive: Option<Duration>,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_FANOUT_CAPACITY);
        Self {
            mount: mount.into(),
            peer_addr,
            content_type: content_type.into(),
            demuxer: Mutex::new(demuxer_kind.build()),
            burst: RwLock::new(BurstQueue::new(burst_bytes)),
            tx,
            subscriber_count: AtomicUsize::new(0),
            keepalive: RwLock::new(keepalive),
            last_activity: RwLock::new(Instant::now()),
            state: RwLock::new(PublisherState::Receiving),
            next_subscriber_id: AtomicU64::new(0),
            subscriber_queues: DashMap::new(),
            subscriber_addrs: DashMap::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PublisherState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        !matches!(self.state(), PublisherState::Closed)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Updates the burst byte budget and keepalive window in place, per the
    /// reconfiguration engine's step 4 ("propagate to the attached
    /// Publisher").
    pub fn reconfigure(&self, burst_bytes: usize, keepalive: Option<Duration>) {
        self.burst.write().set_max_bytes(burst_bytes);
        *self.keepalive.write() = keepalive;
    }

    /// Consumes upstream bytes, demuxing into publishable chunks and fanning
    /// each one out to the burst queue and all subscribers.
    pub fn on_upstream_bytes(&self, buf: &[u8]) {
        self.touch();
        let chunks = self.demuxer.lock().feed(buf);
        for chunk in chunks {
            self.fanout(chunk);
        }
    }

    fn fanout(&self, chunk: Chunk) {
        let bytes = chunk.bytes.clone();
        self.burst.write().append(bytes);
        // The broadcast send never blocks; a subscriber that can't keep up
        // is evicted by the channel itself on its next recv (Lagged), never
        // by the publisher stalling here (§5 back-pressure policy).
        let _ = self.tx.send(Arc::new(chunk));
    }

    /// Replays the current burst queue into a new subscriber, starting at
    /// the first keyframe if the snapshot's head isn't already one, then
    /// returns a receiver for everything appended after this point, plus the
    /// subscriber id and shared queue-depth cell the consuming task should
    /// keep updated via [`Self::note_queue_depth`].
    ///
    /// Holds the burst lock across snapshot + subscribe so no chunk can
    /// land in both the prefill and the live receiver, and none can be
    /// missed — the atomicity pattern is ported from `StreamState::subscribe`.
    #[must_use]
    pub fn attach(&self, peer_addr: Option<SocketAddr>) -> Subscription {
        let burst = self.burst.read();
        let rx = self.tx.subscribe();
        let prefill = burst.snapshot();
        drop(burst);
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let queue_depth = Arc::new(AtomicUsize::new(0));
        self.subscriber_queues.insert(id, Arc::clone(&queue_depth));
        if let Some(addr) = peer_addr {
            self.subscriber_addrs.insert(id, addr);
        }
        Subscription {
            id,
            prefill,
            rx,
            queue_depth,
        }
    }

    /// Called when a subscriber disconnects, overflows, or times out.
    pub fn detach(&self, id: u64) {
        self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
        self.subscriber_queues.remove(&id);
        self.subscriber_addrs.remove(&id);
    }

    /// Snapshot of every live subscriber's id and peer address, for the
    /// status page's mount -> source -> client fd -> client address tree
    /// (§6). The subscriber id stands in for the source's "client fd".
    #[must_use]
    pub fn subscriber_addrs(&self) -> Vec<(u64, SocketAddr)> {
        self.subscriber_addrs
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect()
    }

    /// Snapshot of every live subscriber's last-reported broadcast backlog
    /// (in queued chunks), for the status page's queue-size statistics (§6).
    #[must_use]
    pub fn queue_depths(&self) -> Vec<usize> {
        self.subscriber_queues
            .iter()
            .map(|e| e.value().load(Ordering::Relaxed))
            .collect()
    }

    /// Upstream read returned EOF (or the relay is closing). Transitions to
    /// `Draining` if a keepalive window is configured, else `Closed`.
    pub fn on_upstream_closed(&self) {
        let mut state = self.state.write();
        *state = if self.keepalive.read().is_some() {
            PublisherState::Draining
        } else {
            PublisherState::Closed
        };
    }

    /// Re-arms a draining publisher after its relay reconnects.
    pub fn resume(&self) {
        let mut state = self.state.write();
        if *state == PublisherState::Draining {
            *state = PublisherState::Receiving;
        }
    }

    /// Terminates the publisher. Broadcast receivers observe `Closed` on
    /// their next `recv`, ending every subscriber's stream.
    pub fn close(&self) {
        *self.state.write() = PublisherState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::StreamExt;

    fn publisher(burst_bytes: usize) -> Publisher {
        Publisher::new(
            "/m",
            None,
            "video/MP2T",
            DemuxerKind::Raw,
            burst_bytes,
            None,
        )
    }

    #[tokio::test]
    async fn subscriber_attaching_mid_stream_sees_prefix_then_live_with_no_gap() {
        let p = publisher(10_000);
        p.on_upstream_bytes(b"aaa");
        p.on_upstream_bytes(b"bbb");
        let sub = p.attach(None);
        assert_eq!(sub.prefill.len(), 2);
        assert_eq!(sub.prefill[0].as_ref(), b"aaa");
        assert_eq!(sub.prefill[1].as_ref(), b"bbb");

        p.on_upstream_bytes(b"ccc");

        let mut stream = BroadcastStream::new(sub.rx);
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.bytes.as_ref(), b"ccc");
    }

    #[tokio::test]
    async fn slow_subscriber_overflows_without_affecting_publisher_or_other_subscribers() {
        let p = Publisher::new(
            "/m",
            None,
            "video/MP2T",
            DemuxerKind::Raw,
            10_000,
            None,
        );
        let sub_a = p.attach(None);
        let sub_b = p.attach(None);

        // rx_a never reads; push more chunks than the channel capacity so it lags.
        for i in 0..(DEFAULT_FANOUT_CAPACITY + 10) {
            p.on_upstream_bytes(format!("chunk-{i}").as_bytes());
        }

        let mut stream_a = BroadcastStream::new(sub_a.rx);
        let first_a = stream_a.next().await.unwrap();
        assert!(matches!(first_a, Err(BroadcastStreamRecvError::Lagged(_))));

        // Other subscriber keeps receiving normally; publisher is unaffected.
        let mut stream_b = BroadcastStream::new(sub_b.rx);
        assert!(stream_b.next().await.unwrap().is_ok());
        assert!(p.is_alive());
    }

    #[test]
    fn upstream_eof_without_keepalive_closes_immediately() {
        let p = publisher(100);
        p.on_upstream_closed();
        assert_eq!(p.state(), PublisherState::Closed);
    }

    #[test]
    fn upstream_eof_with_keepalive_drains_then_resumes() {
        let p = Publisher::new(
            "/m",
            None,
            "video/MP2T",
            DemuxerKind::Raw,
            100,
            Some(Duration::from_secs(30)),
        );
        p.on_upstream_closed();
        assert_eq!(p.state(), PublisherState::Draining);
        p.resume();
        assert_eq!(p.state(), PublisherState::Receiving);
    }

    #[test]
    fn attach_detach_tracks_subscriber_count() {
        let p = publisher(100);
        let sub = p.attach(None);
        assert_eq!(p.subscriber_count(), 1);
        p.detach(sub.id);
        assert_eq!(p.subscriber_count(), 0);
    }

    #[test]
    fn queue_depths_reports_one_entry_per_live_subscriber() {
        let p = publisher(100);
        let sub_a = p.attach(None);
        let _sub_b = p.attach(None);
        assert_eq!(p.queue_depths().len(), 2);
        p.detach(sub_a.id);
        assert_eq!(p.queue_depths().len(), 1);
    }
}
