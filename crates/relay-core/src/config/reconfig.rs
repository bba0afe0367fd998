//! Reconfiguration Engine (§4.7): diffs the live relay set against a newly
//! applied [`Config`] and converges with minimal disruption — relays whose
//! desired parameters changed are updated in place, relays no longer desired
//! are closed, and relays newly named are started. Re-applying an unchanged
//! configuration performs zero relay churn (§8). Also propagates burst size
//! and keepalive changes into already-running relays in place, and filters
//! the pending scheduled-restart deque to match.

use std::collections::HashMap;
use std::sync::Arc;

use super::Config;
use crate::handlers::{ActiveHandlers, HandlerRegistry};
use crate::relay::{http, udp};
use crate::relay::{RelayHandle, RelayKey, ServerRegistry};
use crate::relay::{RelayUrl, Scheme};

/// Effective per-relay values, inherited/overridden from mount and root
/// config defaults (§4.7 step 2).
#[derive(Debug, Clone, PartialEq)]
struct DesiredRelay {
    burst_bytes: usize,
    keepalive_secs: Option<u64>,
    on_demand: bool,
    max_queue_size: Option<usize>,
    net_resolve_all: bool,
}

/// `(source url, mount path)` — the identity the reconfiguration engine
/// diffs desired relays on, before DNS fan-out splits it into one or more
/// [`RelayKey`]s (§4.7 `configure_relays`).
type DesiredIndex = HashMap<(String, String), DesiredRelay>;

/// Owns the compile-time handler registry and drives convergence of the live
/// relay set against newly applied configuration.
pub struct ReconfigurationEngine {
    registry: Arc<ServerRegistry>,
    handler_registry: HandlerRegistry,
}

impl ReconfigurationEngine {
    #[must_use]
    pub fn new(registry: Arc<ServerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            handler_registry: HandlerRegistry::builtin(),
        })
    }

    /// Applies `config`, closing `previous` handlers (if any) before
    /// constructing the new set (§4.7 step 1), then converges the relay set
    /// in place (steps 2-6). Returns the freshly built handlers for the
    /// caller to swap into its `AppState`.
    pub async fn apply(
        &self,
        config: &Config,
        previous: Option<ActiveHandlers>,
    ) -> Result<ActiveHandlers, crate::error::RelayError> {
        if let Some(old) = previous {
            old.close();
        }
        let handlers = self.handler_registry.build(config)?;

        let desired = desired_index(config);

        // Step 3 + 4: snapshot every running relay, update in place or close.
        for key in self.registry.running_relay_keys() {
            let Some(handle) = self.registry.get_relay(&key) else {
                continue;
            };
            let lookup = (key.url.clone(), key.path.clone());
            match desired.get(&lookup) {
                Some(d) => handle.reconfigure(d.burst_bytes, d.keepalive_secs),
                None => {
                    handle.close();
                    self.registry.remove_relay(&key);
                }
            }
        }

        // Step 5: drop pending-restart entries for relays no longer desired.
        self.registry.retain_pending_restarts(|key| {
            desired.contains_key(&(key.url.clone(), key.path.clone()))
        });

        // Step 6: start anything desired that isn't already running, reading
        // a fresh view of the registry so step 4's survivors aren't re-added.
        self.configure_relays(&desired).await;

        Ok(handlers)
    }

    /// Respawns the relay task for a due restart-queue entry (§4.1's "run
    /// due callbacks", realized here since the UDP variant is the one that
    /// actually enqueues restarts rather than retrying in its own loop).
    /// A handle whose cancellation token already fired was closed by a
    /// reconfiguration in the meantime; drop it instead of restarting.
    pub async fn restart(&self, key: &RelayKey) {
        let Some(handle) = self.registry.get_relay(key) else {
            return;
        };
        if handle.is_closed() {
            self.registry.remove_relay(key);
            return;
        }
        let registry = Arc::clone(&self.registry);
        match RelayUrl::parse(&key.url) {
            Ok(url) if matches!(url.scheme, Scheme::Udp | Scheme::Multicast) => {
                log::info!("[Reconfig] restarting UDP relay {} -> {}", key.url, key.path);
                tokio::spawn(udp::run_udp_relay(handle, registry));
            }
            Ok(_) => {
                log::info!("[Reconfig] restarting HTTP relay {} -> {}", key.url, key.path);
                tokio::spawn(http::run_http_relay(handle, registry));
            }
            Err(e) => log::warn!("[Reconfig] cannot restart {}: {}", key.url, e),
        }
    }

    async fn configure_relays(&self, desired: &DesiredIndex) {
        for ((url, path), d) in desired {
            let parsed = match RelayUrl::parse(url) {
                Ok(u) => u,
                Err(e) => {
                    log::warn!("[Reconfig] skipping unparseable relay url {url:?}: {e}");
                    continue;
                }
            };

            match parsed.scheme {
                Scheme::Udp | Scheme::Multicast => {
                    self.start_if_missing(
                        RelayKey {
                            url: url.clone(),
                            path: path.clone(),
                            addr: None,
                        },
                        d,
                        false,
                    );
                }
                Scheme::Http if d.net_resolve_all => {
                    match tokio::net::lookup_host((parsed.host.as_str(), parsed.port)).await {
                        Ok(addrs) => {
                            for addr in addrs {
                                self.start_if_missing(
                                    RelayKey {
                                        url: url.clone(),
                                        path: path.clone(),
                                        addr: Some(addr),
                                    },
                                    d,
                                    true,
                                );
                            }
                        }
                        Err(e) => log::warn!(
                            "[Reconfig] net_resolve_all lookup failed for {}:{}: {}",
                            parsed.host,
                            parsed.port,
                            e
                        ),
                    }
                }
                Scheme::Http => {
                    self.start_if_missing(
                        RelayKey {
                            url: url.clone(),
                            path: path.clone(),
                            addr: None,
                        },
                        d,
                        true,
                    );
                }
            }
        }
    }

    /// Starts a relay task for `key` unless one is already running under that
    /// exact key (§4.7 `configure_relays`: "against a fresh read of the
    /// now-current live index").
    fn start_if_missing(&self, key: RelayKey, d: &DesiredRelay, is_http: bool) {
        if self.registry.get_relay(&key).is_some() {
            return;
        }
        let handle = RelayHandle::new(
            key.clone(),
            d.burst_bytes,
            d.keepalive_secs,
            d.on_demand,
            d.max_queue_size,
        );
        self.registry.insert_relay(Arc::clone(&handle));
        let registry = Arc::clone(&self.registry);
        log::info!("[Reconfig] starting relay {} -> {}", key.url, key.path);
        if is_http {
            tokio::spawn(http::run_http_relay(handle, registry));
        } else {
            tokio::spawn(udp::run_udp_relay(handle, registry));
        }
    }
}

fn desired_index(config: &Config) -> DesiredIndex {
    let mut index = HashMap::new();
    for mount in &config.mounts {
        for url in &mount.source_urls {
            index.insert(
                (url.clone(), mount.path.clone()),
                DesiredRelay {
                    burst_bytes: mount.effective_burst_size(config),
                    keepalive_secs: mount.effective_keepalive(config),
                    on_demand: mount.effective_on_demand(config),
                    max_queue_size: mount.effective_max_queue_size(config),
                    net_resolve_all: mount.effective_net_resolve_all(config),
                },
            );
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountConfig;
    use std::time::Duration;

    fn config_with_one_udp_mount() -> Config {
        Config {
            mounts: vec![MountConfig {
                path: "/live.ts".into(),
                source_urls: vec!["udp://239.0.0.1:5000".into()],
                ..MountConfig::default()
            }],
            burst_size: 1024,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn applying_same_config_twice_starts_the_relay_exactly_once() {
        let registry = ServerRegistry::new(None);
        let engine = ReconfigurationEngine::new(Arc::clone(&registry));
        let config = config_with_one_udp_mount();

        let handlers = engine.apply(&config, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.relay_count(), 1);

        let _handlers = engine.apply(&config, Some(handlers)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.relay_count(), 1);
    }

    #[tokio::test]
    async fn removing_a_mount_closes_its_relay() {
        let registry = ServerRegistry::new(None);
        let engine = ReconfigurationEngine::new(Arc::clone(&registry));
        let config = config_with_one_udp_mount();
        let handlers = engine.apply(&config, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.relay_count(), 1);

        let empty = Config::default();
        engine.apply(&empty, Some(handlers)).await.unwrap();
        assert_eq!(registry.relay_count(), 0);
    }

    #[tokio::test]
    async fn reconfiguring_burst_size_updates_relay_in_place_without_restart() {
        let registry = ServerRegistry::new(None);
        let engine = ReconfigurationEngine::new(Arc::clone(&registry));
        let config = config_with_one_udp_mount();
        let handlers = engine.apply(&config, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let key = registry.running_relay_keys().into_iter().next().unwrap();
        let handle_before = registry.get_relay(&key).unwrap();

        let mut updated = config.clone();
        updated.burst_size = 4096;
        engine.apply(&updated, Some(handlers)).await.unwrap();

        let handle_after = registry.get_relay(&key).unwrap();
        assert!(Arc::ptr_eq(&handle_before, &handle_after));
        assert_eq!(handle_after.burst_bytes(), 4096);
    }

    #[test]
    fn unknown_auth_handler_name_surfaces_as_a_configuration_error() {
        let registry = ServerRegistry::new(None);
        let engine = HandlerRegistry::builtin();
        let config = Config {
            auth: vec![crate::config::HandlerConfig {
                handler: "auth.nonexistent".into(),
                options: serde_yaml::Mapping::new(),
            }],
            ..Config::default()
        };
        assert!(engine.build(&config).is_err());
        let _ = registry;
    }
}
