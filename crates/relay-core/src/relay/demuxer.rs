//! Container-format demux capability.
//!
//! MPEG-TS/Ogg/WebM parsing proper is explicitly out of scope (§1); this
//! module defines only the boundary the rest of the relay core depends on:
//! turning a byte stream into publishable chunks, each optionally marked as a
//! keyframe so a newly attaching subscriber can start at a decodable frame
//! (§4.3, §4.4).

use bytes::Bytes;

/// One publishable, boundary-aligned unit of media.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub bytes: Bytes,
    pub keyframe: bool,
}

/// Container-format demux variant selected from the origin's `Content-Type`
/// (§4.6 `transform_response`) or synthesized for UDP/MPEG-TS (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxerKind {
    MpegTs,
    Ogg,
    WebM,
    Raw,
}

impl DemuxerKind {
    /// Selects a variant from a parsed `Content-Type` header value, per the
    /// `transform_response` disposition table in §4.6.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.split(';').next().unwrap_or("").trim();
        match ct {
            "video/MP2T" | "video/mp2t" => Self::MpegTs,
            "application/ogg" => Self::Ogg,
            "video/webm" => Self::WebM,
            _ => Self::Raw,
        }
    }

    /// Builds the concrete demuxer for this variant.
    #[must_use]
    pub fn build(self) -> Box<dyn Demuxer> {
        match self {
            // MPEG-TS/Ogg/WebM frame recognition is out of scope (§1); every
            // variant is backed by the passthrough demuxer until a real one
            // is plugged in.
            Self::MpegTs | Self::Ogg | Self::WebM | Self::Raw => Box::new(RawDemuxer),
        }
    }
}

/// Out-of-scope collaborator: recognizes frame/keyframe boundaries in a
/// container-format byte stream.
///
/// `relay-core` ships only [`RawDemuxer`]; a real MPEG-TS/Ogg/WebM demuxer
/// plugs in here without the rest of the `Publisher` caring.
pub trait Demuxer: Send + Sync {
    /// Consumes `buf`, emitting zero or more publishable chunks.
    fn feed(&mut self, buf: &[u8]) -> Vec<Chunk>;
}

/// Passthrough demuxer: every call to `feed` is exactly one chunk, always
/// marked as a keyframe (there is no frame structure to misalign on).
pub struct RawDemuxer;

impl Demuxer for RawDemuxer {
    fn feed(&mut self, buf: &[u8]) -> Vec<Chunk> {
        if buf.is_empty() {
            return Vec::new();
        }
        vec![Chunk {
            bytes: Bytes::copy_from_slice(buf),
            keyframe: true,
        }]
    }
}
