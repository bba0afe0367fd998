//! Bounded byte-budget FIFO used to seed newly attached subscribers.
//!
//! Chunks correspond to demuxer-recognized media frames; eviction never
//! splits a chunk so a replayed snapshot always starts on a frame boundary.

use std::collections::VecDeque;

use bytes::Bytes;

/// FIFO of byte chunks with a byte-size cap.
///
/// Invariant: either the queue is empty, or `current_size <= max_bytes +
/// size(oldest_chunk)`, and popping the oldest chunk would bring
/// `current_size <= max_bytes`. Appends evict whole chunks from the front to
/// maintain this.
#[derive(Debug, Clone)]
pub struct BurstQueue {
    max_bytes: usize,
    chunks: VecDeque<Bytes>,
    current_size: usize,
}

impl BurstQueue {
    /// Creates an empty queue with the given byte budget.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            chunks: VecDeque::new(),
            current_size: 0,
        }
    }

    /// Returns the configured byte budget.
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Updates the byte budget, evicting from the front if the new budget is
    /// smaller than the current content.
    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        self.max_bytes = max_bytes;
        self.evict();
    }

    /// Appends a chunk, evicting whole oldest chunks from the front until the
    /// invariant holds again.
    ///
    /// O(1) amortized: each byte is evicted at most once per chunk it was
    /// appended in.
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.current_size += chunk.len();
        self.chunks.push_back(chunk);
        self.evict();
    }

    fn evict(&mut self) {
        while let Some(front) = self.chunks.front() {
            let front_len = front.len();
            if self.current_size.saturating_sub(front_len) > self.max_bytes {
                self.current_size -= front_len;
                self.chunks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns an ordered snapshot of the current chunks.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Bytes> {
        self.chunks.iter().cloned().collect()
    }

    /// Current cumulative size of all retained chunks.
    #[must_use]
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Number of chunks currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drops all retained chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.current_size = 0;
    }
}
