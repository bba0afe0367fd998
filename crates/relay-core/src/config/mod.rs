//! Configuration value objects and the burst-size parser (§6).
//!
//! `Config` is the collaborator named in §1 as "out of scope" for *parsing*
//! (the YAML file itself is read by `relay-server`'s CLI layer) — this module
//! owns the parsed value object's shape and the one piece of non-trivial
//! parsing logic the design calls out explicitly: the burst-size grammar.

pub mod reconfig;

pub use reconfig::ReconfigurationEngine;

use std::collections::HashMap;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Root configuration value (§6). All fields are optional and inherit
/// defaults via `#[serde(default)]` throughout plus a hand-written `Default`
/// impl.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub mounts: Vec<MountConfig>,

    #[serde(deserialize_with = "deserialize_burst_size")]
    pub burst_size: usize,
    pub on_demand: bool,
    pub keepalive: Option<u64>,
    pub max_queue_size: Option<usize>,
    pub net_resolve_all: bool,
    pub clients_limit: Option<usize>,

    pub auth: Vec<HandlerConfig>,
    pub status: HashMap<String, HandlerConfig>,
    pub statistics: Vec<HandlerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mounts: Vec::new(),
            burst_size: 0,
            on_demand: false,
            keepalive: None,
            max_queue_size: None,
            net_resolve_all: false,
            clients_limit: None,
            auth: Vec::new(),
            status: HashMap::new(),
            statistics: Vec::new(),
        }
    }
}

/// One configured mount (§6 `mounts[]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MountConfig {
    pub path: String,
    pub source_urls: Vec<String>,

    #[serde(deserialize_with = "deserialize_optional_burst_size")]
    pub burst_size: Option<usize>,
    pub on_demand: Option<bool>,
    pub keepalive: Option<KeepaliveField>,
    pub max_queue_size: Option<usize>,
    pub net_resolve_all: Option<bool>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            source_urls: Vec::new(),
            burst_size: None,
            on_demand: None,
            keepalive: None,
            max_queue_size: None,
            net_resolve_all: None,
        }
    }
}

impl MountConfig {
    /// Effective burst byte budget, inheriting the root default (§4.7 step 2).
    #[must_use]
    pub fn effective_burst_size(&self, root: &Config) -> usize {
        self.burst_size.unwrap_or(root.burst_size)
    }

    /// Effective keepalive window, inheriting the root default. The lenient
    /// coercion (parse failure -> `None`) happens at the YAML boundary via
    /// [`KeepaliveField`]; by the time we read it here it is already `Option<u64>`.
    #[must_use]
    pub fn effective_keepalive(&self, root: &Config) -> Option<u64> {
        match &self.keepalive {
            Some(field) => field.as_secs(),
            None => root.keepalive,
        }
    }

    #[must_use]
    pub fn effective_on_demand(&self, root: &Config) -> bool {
        self.on_demand.unwrap_or(root.on_demand)
    }

    #[must_use]
    pub fn effective_max_queue_size(&self, root: &Config) -> Option<usize> {
        self.max_queue_size.or(root.max_queue_size)
    }

    #[must_use]
    pub fn effective_net_resolve_all(&self, root: &Config) -> bool {
        self.net_resolve_all.unwrap_or(root.net_resolve_all)
    }
}

/// Raw YAML shape of a mount's `keepalive` field, kept distinct from the
/// coerced `Option<u64>` so [`MountConfig::effective_keepalive`] can
/// reproduce the source's lenient swallow-on-bad-type behavior (§9 Open
/// Questions: "adopted as-is").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum KeepaliveField {
    Seconds(i64),
    Other(serde_yaml::Value),
}

impl KeepaliveField {
    /// Coerces to `Option<u64>`, silently swallowing negative or non-integer
    /// values into `None` rather than raising a configuration error — a
    /// deliberately lenient tolerance for malformed keepalive values (§9).
    #[must_use]
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Seconds(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }
}

/// A named handler configuration entry (`auth`, `status`, `statistics`, §6).
/// `handler` is resolved against the compile-time [`crate::handlers::HandlerRegistry`]
/// rather than Python's dynamic `"module.Class"` import (§9).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlerConfig {
    pub handler: String,
    #[serde(flatten)]
    pub options: serde_yaml::Mapping,
}

/// Parses the burst-size grammar from §6: a non-negative integer, or a
/// string matching `^\d+k?$` (suffix `k` multiplies by 1024). Anything else
/// is a configuration error.
///
/// ```
/// # use relay_core::config::parse_burst_size;
/// assert_eq!(parse_burst_size("0").unwrap(), 0);
/// assert_eq!(parse_burst_size("1024").unwrap(), 1024);
/// assert_eq!(parse_burst_size("1k").unwrap(), 1024);
/// assert_eq!(parse_burst_size("64k").unwrap(), 65536);
/// assert!(parse_burst_size("-1").is_err());
/// assert!(parse_burst_size("1m").is_err());
/// ```
pub fn parse_burst_size(raw: &str) -> Result<usize, RelayError> {
    let digits = raw.strip_suffix('k').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RelayError::Configuration(format!(
            "invalid burst_size {raw:?}: expected an integer or \"<digits>k\""
        )));
    }
    let base: usize = digits.parse().map_err(|_| {
        RelayError::Configuration(format!("burst_size {raw:?} overflows a usize"))
    })?;
    if raw.ends_with('k') {
        base.checked_mul(1024).ok_or_else(|| {
            RelayError::Configuration(format!("burst_size {raw:?} overflows after *1024"))
        })
    } else {
        Ok(base)
    }
}

/// `serde` shape of a burst-size field: accepts a bare YAML integer or a
/// string in the §6 grammar.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum BurstSizeValue {
    Int(u64),
    Str(String),
}

impl BurstSizeValue {
    fn resolve(self) -> Result<usize, RelayError> {
        match self {
            Self::Int(n) => Ok(n as usize),
            Self::Str(s) => parse_burst_size(&s),
        }
    }
}

fn deserialize_burst_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    BurstSizeValue::deserialize(deserializer)?
        .resolve()
        .map_err(de::Error::custom)
}

fn deserialize_optional_burst_size<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<BurstSizeValue>::deserialize(deserializer)? {
        Some(v) => v.resolve().map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_size_round_trip() {
        assert_eq!(parse_burst_size("0").unwrap(), 0);
        assert_eq!(parse_burst_size("1024").unwrap(), 1024);
        assert_eq!(parse_burst_size("1k").unwrap(), 1024);
        assert_eq!(parse_burst_size("64k").unwrap(), 65536);
    }

    #[test]
    fn burst_size_rejects_negative_and_non_kilo_suffix() {
        assert!(parse_burst_size("-1").is_err());
        assert!(parse_burst_size("1m").is_err());
        assert!(parse_burst_size("abc").is_err());
        assert!(parse_burst_size("").is_err());
    }

    #[test]
    fn mount_burst_size_inherits_root_default_when_absent() {
        let root = Config {
            burst_size: 2048,
            ..Config::default()
        };
        let mount = MountConfig {
            path: "/m".into(),
            ..MountConfig::default()
        };
        assert_eq!(mount.effective_burst_size(&root), 2048);
    }

    #[test]
    fn mount_burst_size_overrides_root_default() {
        let root = Config {
            burst_size: 2048,
            ..Config::default()
        };
        let mount = MountConfig {
            path: "/m".into(),
            burst_size: Some(512),
            ..MountConfig::default()
        };
        assert_eq!(mount.effective_burst_size(&root), 512);
    }

    #[test]
    fn keepalive_non_integer_coerces_to_none() {
        let field = KeepaliveField::Other(serde_yaml::Value::String("soon".into()));
        assert_eq!(field.as_secs(), None);
    }

    #[test]
    fn keepalive_negative_coerces_to_none() {
        let field = KeepaliveField::Seconds(-5);
        assert_eq!(field.as_secs(), None);
    }

    #[test]
    fn keepalive_valid_integer_passes_through() {
        let field = KeepaliveField::Seconds(30);
        assert_eq!(field.as_secs(), Some(30));
    }

    #[test]
    fn config_from_yaml_parses_burst_size_as_string_or_int() {
        let yaml = r#"
burst_size: "64k"
mounts:
  - path: /radio.mp3
    source_urls: ["http://origin/stream.mp3"]
    burst_size: 2048
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.burst_size, 65536);
        assert_eq!(config.mounts[0].burst_size, Some(2048));
    }
}
