//! Buffered, non-blocking output sink.
//!
//! Two realizations share the §4.2 contract (`append` / `flush` / `empty`):
//!
//! - [`OutputSink`] is the literal non-blocking write queue over an
//!   `AsyncWrite`, used for the relay's own outgoing HTTP request (§4.6,
//!   §5's "relay's own request output sink").
//! - Subscriber fan-out (one publisher to many HTTP clients) instead rides
//!   `tokio::sync::broadcast`, which already evicts slow receivers at the
//!   channel level; [`lagged_error`] converts the resulting `Lagged` into the
//!   same overflow/termination signal used when the sink's own queue fills.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;

/// Outcome of [`OutputSink::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Ok,
    Overflow,
}

/// Outcome of [`OutputSink::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Drained,
    WouldBlock,
}

/// Per-socket non-blocking write queue with an optional bounded byte budget.
///
/// `append` is O(1): the chunk is pushed to the back of the deque and `Qmax`
/// is checked against the *would-be* total, never mutating on overflow.
/// `flush` writes as many queued bytes as the kernel accepts in one call,
/// leaving any partial write queued at the head for the next call.
pub struct OutputSink {
    chunks: VecDeque<Bytes>,
    queued_bytes: usize,
    qmax: Option<usize>,
}

impl OutputSink {
    #[must_use]
    pub fn new(qmax: Option<usize>) -> Self {
        Self {
            chunks: VecDeque::new(),
            queued_bytes: 0,
            qmax,
        }
    }

    /// Queued byte count. Always equals the sum of chunk lengths.
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    #[must_use]
    pub fn empty(&self) -> bool {
        self.queued_bytes == 0
    }

    /// Appends a chunk. Returns [`AppendOutcome::Overflow`] without
    /// enqueueing when it would push the queue past `Qmax`.
    pub fn append(&mut self, chunk: Bytes) -> AppendOutcome {
        if let Some(qmax) = self.qmax {
            if self.queued_bytes + chunk.len() > qmax {
                return AppendOutcome::Overflow;
            }
        }
        self.queued_bytes += chunk.len();
        self.chunks.push_back(chunk);
        AppendOutcome::Ok
    }

    /// Writes as many queued chunks as the socket accepts without blocking.
    /// A partial write leaves the remainder queued at the head.
    pub async fn flush<W: AsyncWriteExt + Unpin>(
        &mut self,
        writer: &mut W,
    ) -> std::io::Result<FlushOutcome> {
        while let Some(chunk) = self.chunks.front_mut() {
            match writer.write(chunk).await {
                Ok(0) => return Ok(FlushOutcome::WouldBlock),
                Ok(n) if n == chunk.len() => {
                    self.queued_bytes -= chunk.len();
                    self.chunks.pop_front();
                }
                Ok(n) => {
                    self.queued_bytes -= n;
                    *chunk = chunk.slice(n..);
                    return Ok(FlushOutcome::WouldBlock);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::WouldBlock);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(FlushOutcome::Drained)
    }
}

/// Builds the bit-exact HTTP/1.0 relay request bytes (§6) queued into an
/// [`OutputSink`] before it is flushed to the upstream socket.
#[must_use]
pub fn build_request_bytes(selector: &str, host: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(format!("GET {} HTTP/1.0\r\n", selector).as_bytes());
    buf.extend_from_slice(format!("Host: {}\r\n", host).as_bytes());
    buf.extend_from_slice(b"icy-metadata: 1\r\n");
    buf.extend_from_slice(b"Connection: close\r\n");
    buf.extend_from_slice(b"Content-Length: 0\r\n");
    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}

/// Converts a broadcast-channel `Lagged` notification into the I/O error a
/// subscriber's stream terminates with. Centralizes the "client overflow,
/// log at info" disposition (§7) in one place.
pub fn lagged_error(mount: &str, skipped: u64) -> std::io::Error {
    log::info!(
        "[Relay] subscriber on {} overflowed output sink, dropped ({} chunks skipped)",
        mount,
        skipped
    );
    std::io::Error::other(format!("output sink overflow: lagged by {skipped} chunks"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tracks_queued_bytes() {
        let mut sink = OutputSink::new(None);
        assert_eq!(sink.append(Bytes::from_static(b"hello")), AppendOutcome::Ok);
        assert_eq!(sink.queued_bytes(), 5);
        assert!(!sink.empty());
    }

    #[test]
    fn append_overflow_does_not_enqueue() {
        let mut sink = OutputSink::new(Some(4));
        assert_eq!(sink.append(Bytes::from_static(b"hello")), AppendOutcome::Overflow);
        assert_eq!(sink.queued_bytes(), 0);
        assert!(sink.empty());
    }

    #[test]
    fn append_exactly_at_cap_succeeds() {
        let mut sink = OutputSink::new(Some(5));
        assert_eq!(sink.append(Bytes::from_static(b"hello")), AppendOutcome::Ok);
    }

    #[tokio::test]
    async fn flush_drains_queued_chunks_to_a_buffer() {
        let mut sink = OutputSink::new(None);
        sink.append(Bytes::from_static(b"abc"));
        sink.append(Bytes::from_static(b"def"));
        let mut out = Vec::new();
        let outcome = sink.flush(&mut out).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Drained);
        assert_eq!(out, b"abcdef");
        assert!(sink.empty());
    }

    #[test]
    fn request_bytes_are_bit_exact() {
        let bytes = build_request_bytes("/stream.ts", "origin.example");
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(
            text,
            "GET /stream.ts HTTP/1.0\r\nHost: origin.example\r\nicy-metadata: 1\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );
    }
}
