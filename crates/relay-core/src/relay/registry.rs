//! Server-wide registries: mount → publishers, socket/key → relay, and the
//! scheduled-restart deque (§3 `ServerRegistry`, §4.8).
//!
//! A `DashMap<String, Vec<Arc<Publisher>>>` keyed by mount path rather than a
//! single generated id, since a mount can have more than one live publisher
//! at once (one per relay address when `net_resolve_all` fans out, or during
//! a reconnect hand-off), per §3's data model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use super::publisher::{Publisher, PublisherState};
use super::relay::{RelayHandle, RelayKey};

/// Aggregate queue-depth statistics for the status page (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueDepthStats {
    pub min: usize,
    pub max: usize,
    pub median: usize,
    pub mean: f64,
}

/// Mapping `mount -> set<Publisher>`, `socket/key -> Relay`, plus the
/// scheduled-restart deque and the global client-count gate (§3, §4.8).
pub struct ServerRegistry {
    sources: DashMap<String, Vec<Arc<Publisher>>>,
    relays: DashMap<RelayKey, Arc<RelayHandle>>,
    restart_queue: Mutex<VecDeque<(Instant, RelayKey)>>,
    client_count: AtomicUsize,
    clients_limit: RwLock<Option<usize>>,
    /// Woken whenever a publisher is added, so a subscriber that just
    /// triggered an on-demand relay's connect can wait for it to appear
    /// instead of polling tightly (§4.6 on-demand hand-off).
    publisher_ready: Notify,
}

impl ServerRegistry {
    #[must_use]
    pub fn new(clients_limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            sources: DashMap::new(),
            relays: DashMap::new(),
            restart_queue: Mutex::new(VecDeque::new()),
            client_count: AtomicUsize::new(0),
            clients_limit: RwLock::new(clients_limit),
            publisher_ready: Notify::new(),
        })
    }

    // -- Publishers ---------------------------------------------------

    pub fn add_publisher(&self, publisher: Arc<Publisher>) {
        self.sources
            .entry(publisher.mount.clone())
            .or_default()
            .push(publisher);
        self.publisher_ready.notify_waiters();
    }

    /// Waits (bounded by `timeout`) for a publisher to appear and become
    /// alive on `mount`, polling on each `publisher_ready` wake. Used by the
    /// mount-GET handler after nudging an on-demand relay awake.
    pub async fn wait_for_publisher(
        &self,
        mount: &str,
        timeout: Duration,
    ) -> Option<Arc<Publisher>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(p) = self.pick_publisher(mount) {
                return Some(p);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = tokio::time::timeout(remaining, self.publisher_ready.notified()).await;
        }
    }

    /// Removes a publisher by reference identity. O(n) in the mount's
    /// publisher count, which is expected to be small (one per relay
    /// address at most).
    pub fn remove_publisher(&self, mount: &str, publisher: &Arc<Publisher>) {
        if let Some(mut entry) = self.sources.get_mut(mount) {
            entry.retain(|p| !Arc::ptr_eq(p, publisher));
        }
    }

    #[must_use]
    pub fn publishers_for(&self, mount: &str) -> Vec<Arc<Publisher>> {
        self.sources
            .get(mount)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// A mount is alive iff it has at least one publisher in `Receiving` or
    /// `Draining` (§3, §4.4).
    #[must_use]
    pub fn mount_alive(&self, mount: &str) -> bool {
        self.publishers_for(mount)
            .iter()
            .any(|p| p.is_alive())
    }

    /// Picks a publisher to attach a new subscriber to: the first alive one
    /// (§4.8 "pick a publisher (round-robin or first)" — this realization
    /// uses first-alive, since a typical mount has exactly one live
    /// publisher and `net_resolve_all` fan-out is a transient multi-publisher
    /// state during reconnect, not a steady-state load-balancing scenario).
    #[must_use]
    pub fn pick_publisher(&self, mount: &str) -> Option<Arc<Publisher>> {
        self.publishers_for(mount).into_iter().find(|p| p.is_alive())
    }

    /// Closes and drops publishers that finished draining without a
    /// reconnect inside their keepalive window.
    /// Closes any `Draining` publisher whose keepalive window has elapsed
    /// since its last upstream byte, then drops every now-`Closed` entry
    /// (§4.8's periodic inactivity sweep).
    pub fn sweep_publishers(&self) {
        let now = Instant::now();
        for mut entry in self.sources.iter_mut() {
            entry.value_mut().retain(|p| {
                if p.state() == PublisherState::Draining {
                    let window = p
                        .keepalive
                        .read()
                        .unwrap_or(Duration::from_secs(crate::protocol_constants::DEFAULT_INACTIVITY_TIMEOUT_SECS));
                    if now.duration_since(p.last_activity()) >= window {
                        p.close();
                    }
                }
                p.state() != PublisherState::Closed
            });
        }
    }

    // -- Relays ---------------------------------------------------------

    pub fn insert_relay(&self, handle: Arc<RelayHandle>) {
        self.relays.insert(handle.key.clone(), handle);
    }

    #[must_use]
    pub fn get_relay(&self, key: &RelayKey) -> Option<Arc<RelayHandle>> {
        self.relays.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn remove_relay(&self, key: &RelayKey) -> Option<Arc<RelayHandle>> {
        self.relays.remove(key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn running_relay_keys(&self) -> Vec<RelayKey> {
        self.relays.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// All relay handles configured for a given mount path, regardless of
    /// upstream URL/address. Used to nudge `on_demand` relays awake when a
    /// subscriber arrives at a mount with no live publisher (§4.6).
    #[must_use]
    pub fn relays_for_path(&self, path: &str) -> Vec<Arc<RelayHandle>> {
        self.relays
            .iter()
            .filter(|e| e.key().path == path)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    // -- Restart scheduling ----------------------------------------------

    pub fn schedule_restart(&self, key: RelayKey, delay: Duration) {
        self.restart_queue
            .lock()
            .push_back((Instant::now() + delay, key));
    }

    /// Removes pending-restart entries whose `(url, path)` no longer
    /// appears in the desired index (§4.7 step 5).
    pub fn retain_pending_restarts(&self, mut keep: impl FnMut(&RelayKey) -> bool) {
        self.restart_queue.lock().retain(|(_, key)| keep(key));
    }

    /// Drains and returns restart entries whose deadline has passed.
    pub fn drain_due_restarts(&self) -> Vec<RelayKey> {
        let mut queue = self.restart_queue.lock();
        let now = Instant::now();
        let mut due = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some((deadline, key)) = queue.pop_front() {
            if deadline <= now {
                due.push(key);
            } else {
                remaining.push_back((deadline, key));
            }
        }
        *queue = remaining;
        due
    }

    #[must_use]
    pub fn pending_restart_count(&self) -> usize {
        self.restart_queue.lock().len()
    }

    // -- Client limit -----------------------------------------------------

    #[must_use]
    pub fn clients_limit(&self) -> Option<usize> {
        *self.clients_limit.read()
    }

    pub fn set_clients_limit(&self, limit: Option<usize>) {
        *self.clients_limit.write() = limit;
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// Attempts to admit one more client. Returns `false` (503, §4.8) if the
    /// global limit is already reached.
    #[must_use]
    pub fn try_acquire_client(&self) -> bool {
        let limit = self.clients_limit();
        loop {
            let current = self.client_count.load(Ordering::Relaxed);
            if let Some(limit) = limit {
                if current >= limit {
                    return false;
                }
            }
            if self
                .client_count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release_client(&self) {
        self.client_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Min/max/median/mean of every live subscriber's output queue depth,
    /// across every mount (§6's status page queue-size statistics). Returns
    /// `None` when there are no subscribers. The median follows the source's
    /// documented floor-division-on-even-length-lists behavior rather than
    /// averaging the two middle values (§9 Open Questions: "adopted as-is").
    #[must_use]
    pub fn queue_depth_stats(&self) -> Option<QueueDepthStats> {
        let mut depths: Vec<usize> = self
            .sources
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .flat_map(|p| p.queue_depths())
                    .collect::<Vec<_>>()
            })
            .collect();
        if depths.is_empty() {
            return None;
        }
        depths.sort_unstable();
        let len = depths.len();
        let sum: usize = depths.iter().sum();
        Some(QueueDepthStats {
            min: depths[0],
            max: depths[len - 1],
            median: depths[len / 2],
            mean: sum as f64 / len as f64,
        })
    }

    /// Snapshot of mount -> source address -> client fd -> client address,
    /// for the status page (§6).
    #[must_use]
    pub fn mount_tree(&self) -> Vec<(String, Vec<(Option<String>, Vec<(u64, String)>)>)> {
        self.sources
            .iter()
            .map(|entry| {
                let sources = entry
                    .value()
                    .iter()
                    .map(|p| {
                        let clients = p
                            .subscriber_addrs()
                            .into_iter()
                            .map(|(id, addr)| (id, addr.to_string()))
                            .collect();
                        (p.peer_addr.map(|a| a.to_string()), clients)
                    })
                    .collect();
                (entry.key().clone(), sources)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::demuxer::DemuxerKind;

    #[test]
    fn client_limit_gates_admission() {
        let registry = ServerRegistry::new(Some(1));
        assert!(registry.try_acquire_client());
        assert!(!registry.try_acquire_client());
        registry.release_client();
        assert!(registry.try_acquire_client());
    }

    #[test]
    fn no_limit_means_unbounded_admission() {
        let registry = ServerRegistry::new(None);
        for _ in 0..100 {
            assert!(registry.try_acquire_client());
        }
    }

    #[test]
    fn removing_one_mounts_publisher_leaves_sibling_mount_untouched() {
        let registry = ServerRegistry::new(None);
        let pub_a = Arc::new(Publisher::new("/a", None, "video/MP2T", DemuxerKind::Raw, 1024, None));
        let pub_b = Arc::new(Publisher::new("/b", None, "video/MP2T", DemuxerKind::Raw, 1024, None));
        registry.add_publisher(Arc::clone(&pub_a));
        registry.add_publisher(Arc::clone(&pub_b));

        registry.remove_publisher("/a", &pub_a);

        assert!(registry.publishers_for("/a").is_empty());
        let b_publishers = registry.publishers_for("/b");
        assert_eq!(b_publishers.len(), 1);
        assert!(Arc::ptr_eq(&b_publishers[0], &pub_b));
    }

    #[test]
    fn queue_depth_stats_is_none_with_no_subscribers() {
        let registry = ServerRegistry::new(None);
        let publisher = Arc::new(Publisher::new("/a", None, "video/MP2T", DemuxerKind::Raw, 1024, None));
        registry.add_publisher(publisher);
        assert!(registry.queue_depth_stats().is_none());
    }

    #[test]
    fn queue_depth_stats_aggregates_across_mounts() {
        let registry = ServerRegistry::new(None);
        let pub_a = Arc::new(Publisher::new("/a", None, "video/MP2T", DemuxerKind::Raw, 1024, None));
        let pub_b = Arc::new(Publisher::new("/b", None, "video/MP2T", DemuxerKind::Raw, 1024, None));
        let _sub_a = pub_a.attach(None);
        let _sub_b = pub_b.attach(None);
        registry.add_publisher(pub_a);
        registry.add_publisher(pub_b);

        let stats = registry.queue_depth_stats().unwrap();
        assert_eq!(stats.min, 0);
        assert_eq!(stats.max, 0);
        assert_eq!(stats.median, 0);
        assert_eq!(stats.mean, 0.0);
    }

    #[test]
    fn restart_queue_drains_only_due_entries() {
        let registry = ServerRegistry::new(None);
        let key = RelayKey {
            url: "http://o/".into(),
            path: "/m".into(),
            addr: None,
        };
        registry.schedule_restart(key.clone(), Duration::from_secs(0));
        registry.schedule_restart(key.clone(), Duration::from_secs(60));
        let due = registry.drain_due_restarts();
        assert_eq!(due.len(), 1);
        assert_eq!(registry.pending_restart_count(), 1);
    }
}
