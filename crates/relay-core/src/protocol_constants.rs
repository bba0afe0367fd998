//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the relay/fan-out design itself (not a tunable,
//! not read from configuration) and changing them would break compatibility
//! with the behavior they're documented against.

// ─────────────────────────────────────────────────────────────────────────────
// Relay — UDP variant
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum number of bytes to accumulate on a UDP relay before registering a
/// publisher (64 KiB).
///
/// Filters dead sources: a `udp://` or `multicast://` socket that never
/// accumulates this much data never becomes a publisher, so a misconfigured
/// or silent origin doesn't leave an empty mount hanging around.
pub const MIN_START_BUFFER: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Relay — HTTP variant
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum bytes read while parsing an upstream origin's response headers
/// before treating the response as oversized (fatal).
pub const RESPONSE_MAX_SIZE: usize = 4096;

/// Fixed reconnect backoff ladder for a relay whose upstream connection was
/// closed or failed (milliseconds). The relay waits `RETRY_DELAYS_MS[0]`
/// before the first reconnect attempt, `RETRY_DELAYS_MS[1]` before the
/// second, and so on, repeating the last delay for subsequent attempts.
pub const RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// ICY metadata interval (bytes between metadata blocks) for listeners that
/// sent `icy-metadata: 1`.
pub const ICY_METAINT: usize = 8192;

// ─────────────────────────────────────────────────────────────────────────────
// Server Core
// ─────────────────────────────────────────────────────────────────────────────

/// Default inactivity timeout applied to a subscriber or relay handler with no
/// configured keepalive window (seconds).
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 60;

/// Interval between inactivity sweeps (seconds).
pub const INACTIVITY_SWEEP_INTERVAL_SECS: u64 = 10;

/// Application name surfaced in `icy-name` and status output.
pub const APP_NAME: &str = "relay-server";

/// Max time a mount GET handler waits for an on-demand relay it just nudged
/// awake to register a publisher before giving up with 404 (§4.6).
pub const ON_DEMAND_CONNECT_TIMEOUT_SECS: u64 = 10;
