//! Server configuration.
//!
//! The relay/mount/handler configuration schema itself lives in
//! `relay_core::Config` (§6); this module is the thin CLI-facing layer
//! around it: loading the YAML file and applying environment/CLI overrides
//! for the handful of fields that aren't part of the relay configuration
//! value object (bind address, log level defaults).

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use relay_core::Config;

/// Default HTTP bind address when neither the config file nor `--bind`
/// specify one.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Loads the relay configuration from a YAML file.
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Resolves the bind address: `--bind` overrides the `RELAY_BIND_ADDR`
/// environment variable, which overrides the built-in default.
pub fn resolve_bind_addr(cli_override: Option<SocketAddr>) -> Result<SocketAddr> {
    if let Some(addr) = cli_override {
        return Ok(addr);
    }
    if let Ok(val) = std::env::var("RELAY_BIND_ADDR") {
        return val
            .parse()
            .with_context(|| format!("invalid RELAY_BIND_ADDR {val:?}"));
    }
    Ok(DEFAULT_BIND_ADDR.parse().expect("default bind addr is valid"))
}
