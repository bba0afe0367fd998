//! ICY/Shoutcast metadata support for mount listeners.
//!
//! The relay/fan-out core itself treats media as opaque byte chunks (see
//! [`crate::relay::demuxer`]); this module is purely about the optional
//! `icy-metaint` side-channel that HTTP clients can request.

pub mod icy;

pub use icy::{IcyFormatter, IcyMetadataInjector};

use serde::{Deserialize, Serialize};

/// Current track metadata for a mount, used to build ICY `StreamTitle` blocks.
///
/// Populated from the origin's own ICY headers when relaying an HTTP/Icecast
/// source, or left empty for raw UDP/MPEG-TS relays which carry no ICY
/// metadata of their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub source: Option<String>,
}
