//! Compile-time handler registry (§9).
//!
//! The `auth`/`status`/`statistics` configuration entries name a handler by
//! string rather than a dynamic module import. The same `HandlerConfig
//! { handler, options }` shape is resolved against a
//! `HashMap<&str, fn(...) -> Result<...>>` built once at startup
//! (`HandlerRegistry::builtin`) — an unknown name is a configuration error
//! caught at reconfigure time, not a runtime import failure. A `phf` map was
//! considered (closer to the "compile-time" framing) but dropped: nothing
//! else in this dependency stack needs it, and a `HashMap` built once
//! satisfies the same contract.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::config::{Config, HandlerConfig};
use crate::error::RelayError;
use crate::relay::ServerRegistry;

/// Decides whether a request against `mount` is permitted. Handler bodies
/// beyond the registry/dispatch mechanism are out of scope (§1); the two
/// built-ins below exist to exercise the seam, not as a complete
/// authentication story.
pub trait AuthHandler: Send + Sync {
    fn authorize(&self, mount: &str, auth_header: Option<&str>) -> bool;
}

/// Renders a [`StatusReport`] for one configured status path (§6).
pub trait StatusHandler: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn render(&self, report: &StatusReport) -> String;
}

/// Observes every status snapshot as it's produced, e.g. to export metrics.
pub trait StatisticsHandler: Send + Sync {
    fn record(&self, report: &StatusReport);
}

type AuthCtor = fn(&Mapping) -> Result<Arc<dyn AuthHandler>, RelayError>;
type StatusCtor = fn(&Mapping) -> Result<Arc<dyn StatusHandler>, RelayError>;
type StatisticsCtor = fn(&Mapping) -> Result<Arc<dyn StatisticsHandler>, RelayError>;

/// The constructed set of handlers for one applied [`Config`] (§4.7 step 1).
/// Rebuilt wholesale on every reconfiguration; the previous set is dropped
/// via [`Self::close`] before the new one comes into service.
#[derive(Default)]
pub struct ActiveHandlers {
    auth: Vec<Arc<dyn AuthHandler>>,
    status: HashMap<String, Arc<dyn StatusHandler>>,
    statistics: Vec<Arc<dyn StatisticsHandler>>,
}

impl ActiveHandlers {
    /// A mount is reachable iff every configured auth handler allows it
    /// (an empty list allows everything, matching "no `auth` configured").
    #[must_use]
    pub fn authorize(&self, mount: &str, auth_header: Option<&str>) -> bool {
        self.auth.iter().all(|h| h.authorize(mount, auth_header))
    }

    #[must_use]
    pub fn status_handler(&self, path: &str) -> Option<Arc<dyn StatusHandler>> {
        self.status.get(path).cloned()
    }

    pub fn record(&self, report: &StatusReport) {
        for handler in &self.statistics {
            handler.record(report);
        }
    }

    /// Releases whatever the previous configuration's handlers held. The
    /// built-in handlers are stateless, so this is currently a no-op, but it
    /// is the seam a future stateful handler (a metrics exporter holding a
    /// socket, say) would hook into.
    pub fn close(self) {}
}

/// Compile-time name -> constructor map (§9).
pub struct HandlerRegistry {
    auth: HashMap<&'static str, AuthCtor>,
    status: HashMap<&'static str, StatusCtor>,
    statistics: HashMap<&'static str, StatisticsCtor>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn builtin() -> Self {
        let mut auth: HashMap<&'static str, AuthCtor> = HashMap::new();
        auth.insert("auth.allow_all", |_| {
            Ok(Arc::new(AllowAllAuth) as Arc<dyn AuthHandler>)
        });
        auth.insert("auth.header_token", |opts| {
            Ok(Arc::new(HeaderTokenAuth::from_options(opts)?) as Arc<dyn AuthHandler>)
        });

        let mut status: HashMap<&'static str, StatusCtor> = HashMap::new();
        status.insert("status.json", |_| {
            Ok(Arc::new(JsonStatusHandler) as Arc<dyn StatusHandler>)
        });
        status.insert("status.plaintext", |_| {
            Ok(Arc::new(PlaintextStatusHandler) as Arc<dyn StatusHandler>)
        });

        let mut statistics: HashMap<&'static str, StatisticsCtor> = HashMap::new();
        statistics.insert("statistics.log", |_| {
            Ok(Arc::new(LogStatisticsHandler) as Arc<dyn StatisticsHandler>)
        });

        Self {
            auth,
            status,
            statistics,
        }
    }

    /// Rebuilds the full handler set from `config` (§4.7 step 1).
    pub fn build(&self, config: &Config) -> Result<ActiveHandlers, RelayError> {
        let auth = config
            .auth
            .iter()
            .map(|c| self.construct(&self.auth, c))
            .collect::<Result<_, _>>()?;

        let mut status = HashMap::with_capacity(config.status.len());
        for (path, cfg) in &config.status {
            status.insert(path.clone(), self.construct(&self.status, cfg)?);
        }

        let statistics = config
            .statistics
            .iter()
            .map(|c| self.construct(&self.statistics, c))
            .collect::<Result<_, _>>()?;

        Ok(ActiveHandlers {
            auth,
            status,
            statistics,
        })
    }

    fn construct<T: ?Sized>(
        &self,
        table: &HashMap<&'static str, fn(&Mapping) -> Result<Arc<T>, RelayError>>,
        cfg: &HandlerConfig,
    ) -> Result<Arc<T>, RelayError> {
        let ctor = table.get(cfg.handler.as_str()).ok_or_else(|| {
            RelayError::Configuration(format!("unknown handler {:?}", cfg.handler))
        })?;
        ctor(&cfg.options)
    }
}

fn option_str<'a>(options: &'a Mapping, key: &str) -> Option<&'a str> {
    options.get(Value::String(key.into())).and_then(Value::as_str)
}

/// Allows every request (the default when no `auth` entries are configured).
struct AllowAllAuth;

impl AuthHandler for AllowAllAuth {
    fn authorize(&self, _mount: &str, _auth_header: Option<&str>) -> bool {
        true
    }
}

/// Allows requests whose `Authorization` header matches a fixed configured
/// token. Illustrates the registry seam; real deployments would plug in
/// something backed by an actual credential store.
struct HeaderTokenAuth {
    expected: String,
}

impl HeaderTokenAuth {
    fn from_options(options: &Mapping) -> Result<Self, RelayError> {
        let token = option_str(options, "token").ok_or_else(|| {
            RelayError::Configuration("auth.header_token requires a \"token\" option".into())
        })?;
        Ok(Self {
            expected: token.to_string(),
        })
    }
}

impl AuthHandler for HeaderTokenAuth {
    fn authorize(&self, _mount: &str, auth_header: Option<&str>) -> bool {
        auth_header == Some(self.expected.as_str())
    }
}

/// Reference status-page implementation: the full [`StatusReport`] as JSON.
struct JsonStatusHandler;

impl StatusHandler for JsonStatusHandler {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, report: &StatusReport) -> String {
        serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Minimal human-readable status page.
struct PlaintextStatusHandler;

impl StatusHandler for PlaintextStatusHandler {
    fn content_type(&self) -> &'static str {
        "text/plain"
    }

    fn render(&self, report: &StatusReport) -> String {
        let mut out = format!(
            "pid: {}\nclients: {}\n",
            report.pid, report.client_count
        );
        if let Some(limit) = report.clients_limit {
            out.push_str(&format!("clients_limit: {limit}\n"));
        }
        if let Some(q) = &report.queue_depth {
            out.push_str(&format!(
                "queue_depth: min={} max={} median={} mean={:.2}\n",
                q.min, q.max, q.median, q.mean
            ));
        }
        for mount in &report.mounts {
            out.push_str(&format!("{}: {} source(s)\n", mount.path, mount.sources.len()));
        }
        out
    }
}

/// Logs each snapshot at info level. A stand-in for a real metrics exporter.
struct LogStatisticsHandler;

impl StatisticsHandler for LogStatisticsHandler {
    fn record(&self, report: &StatusReport) {
        log::info!(
            "[Statistics] clients={} mounts={}",
            report.client_count,
            report.mounts.len()
        );
    }
}

/// Point-in-time server status (§6: client count, pid, per-subscriber queue
/// size stats, mount -> source -> client tree).
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub pid: u32,
    pub client_count: usize,
    pub clients_limit: Option<usize>,
    pub queue_depth: Option<QueueDepthSummary>,
    pub mounts: Vec<MountStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDepthSummary {
    pub min: usize,
    pub max: usize,
    pub median: usize,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MountStatus {
    pub path: String,
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub address: Option<String>,
    pub client_count: usize,
    pub clients: Vec<ClientStatus>,
}

/// One connected subscriber: the attach-order id stands in for the source's
/// "client fd" (§6), since a Rust server has no portable raw fd to expose.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub fd: u64,
    pub address: String,
}

impl StatusReport {
    #[must_use]
    pub fn snapshot(registry: &ServerRegistry) -> Self {
        Self {
            pid: std::process::id(),
            client_count: registry.client_count(),
            clients_limit: registry.clients_limit(),
            queue_depth: registry.queue_depth_stats().map(|s| QueueDepthSummary {
                min: s.min,
                max: s.max,
                median: s.median,
                mean: s.mean,
            }),
            mounts: registry
                .mount_tree()
                .into_iter()
                .map(|(path, sources)| MountStatus {
                    path,
                    sources: sources
                        .into_iter()
                        .map(|(address, clients)| SourceStatus {
                            address,
                            client_count: clients.len(),
                            clients: clients
                                .into_iter()
                                .map(|(fd, address)| ClientStatus { fd, address })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_config(handler: &str) -> HandlerConfig {
        HandlerConfig {
            handler: handler.to_string(),
            options: Mapping::new(),
        }
    }

    #[test]
    fn unknown_handler_name_is_a_configuration_error() {
        let registry = HandlerRegistry::builtin();
        let config = Config {
            auth: vec![handler_config("auth.does_not_exist")],
            ..Config::default()
        };
        assert!(registry.build(&config).is_err());
    }

    #[test]
    fn allow_all_auth_permits_everything_by_default() {
        let registry = HandlerRegistry::builtin();
        let config = Config::default();
        let handlers = registry.build(&config).unwrap();
        assert!(handlers.authorize("/any", None));
    }

    #[test]
    fn header_token_auth_rejects_missing_or_wrong_token() {
        let registry = HandlerRegistry::builtin();
        let mut options = Mapping::new();
        options.insert(Value::String("token".into()), Value::String("secret".into()));
        let config = Config {
            auth: vec![HandlerConfig {
                handler: "auth.header_token".to_string(),
                options,
            }],
            ..Config::default()
        };
        let handlers = registry.build(&config).unwrap();
        assert!(!handlers.authorize("/m", None));
        assert!(!handlers.authorize("/m", Some("wrong")));
        assert!(handlers.authorize("/m", Some("secret")));
    }

    #[test]
    fn header_token_auth_without_token_option_is_a_configuration_error() {
        let registry = HandlerRegistry::builtin();
        let config = Config {
            auth: vec![handler_config("auth.header_token")],
            ..Config::default()
        };
        assert!(registry.build(&config).is_err());
    }

    #[test]
    fn status_report_snapshot_reflects_registry_state() {
        let server_registry = ServerRegistry::new(Some(10));
        let report = StatusReport::snapshot(&server_registry);
        assert_eq!(report.client_count, 0);
        assert_eq!(report.clients_limit, Some(10));
        assert!(report.mounts.is_empty());
    }

    #[test]
    fn json_status_handler_renders_valid_json() {
        let server_registry = ServerRegistry::new(None);
        let report = StatusReport::snapshot(&server_registry);
        let handler = JsonStatusHandler;
        let rendered = handler.render(&report);
        assert!(serde_json::from_str::<serde_json::Value>(&rendered).is_ok());
    }
}
