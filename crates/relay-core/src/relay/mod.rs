//! Relay subsystem: upstream ingress, fan-out, and the registries tying them
//! together (§2 items 1-7, §4).

pub mod burst;
pub mod demuxer;
pub mod event_mask;
pub mod http;
pub mod publisher;
pub mod registry;
pub mod relay;
pub mod response_parser;
pub mod sink;
pub mod udp;
pub mod url;

pub use burst::BurstQueue;
pub use demuxer::{Chunk, Demuxer, DemuxerKind};
pub use event_mask::EventMask;
pub use publisher::{Publisher, PublisherState, Subscription};
pub use registry::{QueueDepthStats, ServerRegistry};
pub use relay::{RelayConfig, RelayHandle, RelayKey, RelayState};
pub use url::{RelayUrl, Scheme};
