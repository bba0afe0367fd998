//! relay-core - shared library for the streaming relay and fan-out server.
//!
//! This crate pulls live audio/video from HTTP/Icecast and UDP/multicast
//! MPEG-TS origins, re-broadcasts each mount to many HTTP listeners, and
//! supports live reconfiguration without dropping unaffected mounts.
//!
//! # Architecture
//!
//! - [`relay`]: upstream ingress (`Publisher`, the UDP/HTTP relay state
//!   machines), subscriber fan-out, and the server-wide registries.
//! - [`config`]: the configuration value objects and the reconfiguration
//!   engine that converges the live relay set against a newly applied
//!   configuration.
//! - [`handlers`]: the compile-time auth/status/statistics handler registry.
//! - [`stream`]: ICY/Shoutcast metadata injection for HTTP listeners.
//! - [`api`]: the axum HTTP surface (mount GET, status pages, reconfigure).
//! - [`error`]: centralized error types and their HTTP mapping.
//! - [`protocol_constants`]: tunable constants named directly in the design
//!   (buffer sizes, retry ladder, inactivity timeouts).

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol_constants;
pub mod relay;
pub mod stream;

pub use api::{start_server, AppState};
pub use config::{Config, MountConfig, ReconfigurationEngine};
pub use error::{RelayError, RelayResult};
pub use handlers::{ActiveHandlers, HandlerRegistry, StatusReport};
pub use relay::{Publisher, RelayHandle, RelayKey, ServerRegistry};
