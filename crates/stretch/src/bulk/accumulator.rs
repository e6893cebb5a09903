//! 📦 Accumulator: the buffer where encoded actions wait for their ride.
//!
//! Append, count, compare against the thresholds, and when asked, hand the whole
//! thing over and start fresh. It never does I/O and it never locks anything
//! itself; the indexer holds the lock around every call.

use std::time::Duration;

// ⏱️ tokio's Instant, so paused test clocks age the buffer too.
use tokio::time::Instant;

/// 🏷️ Why a batch left the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushCause {
    /// Byte size or document count reached its limit.
    Threshold,
    /// The timer decided the buffer had waited long enough.
    Timer,
    /// Somebody called `flush_now` (or shutdown did).
    Manual,
}

/// 📦 A detached snapshot of the buffer, owned by whoever sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushBatch {
    pub body: Vec<u8>,
    pub doc_count: usize,
    pub cause: FlushCause,
}

#[derive(Debug)]
pub(crate) struct Accumulator {
    buf: Vec<u8>,
    doc_count: usize,
    oldest_doc_at: Option<Instant>,
    max_buffer_bytes: usize,
    max_docs: usize,
}

impl Accumulator {
    pub(crate) fn new(max_buffer_bytes: usize, max_docs: usize) -> Self {
        Self {
            buf: Vec::new(),
            doc_count: 0,
            oldest_doc_at: None,
            max_buffer_bytes,
            max_docs,
        }
    }

    /// 📥 Add one encoded action. Returns true when the caller must flush right now.
    pub(crate) fn append(&mut self, encoded_action: &[u8]) -> bool {
        if self.doc_count == 0 {
            self.oldest_doc_at = Some(Instant::now());
        }
        self.buf.extend_from_slice(encoded_action);
        self.doc_count += 1;
        self.is_over_threshold()
    }

    pub(crate) fn is_over_threshold(&self) -> bool {
        self.buf.len() >= self.max_buffer_bytes || self.doc_count >= self.max_docs
    }

    /// 🔄 Swap in a fresh buffer and return the old one. `None` if there was nothing to take.
    pub(crate) fn take(&mut self, cause: FlushCause) -> Option<FlushBatch> {
        if self.doc_count == 0 {
            return None;
        }
        let body = std::mem::take(&mut self.buf);
        let doc_count = std::mem::replace(&mut self.doc_count, 0);
        self.oldest_doc_at = None;
        Some(FlushBatch {
            body,
            doc_count,
            cause,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    pub(crate) fn len_bytes(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn doc_count(&self) -> usize {
        self.doc_count
    }

    /// ⏱️ How long the oldest buffered document has been waiting.
    pub(crate) fn oldest_doc_age(&self) -> Option<Duration> {
        self.oldest_doc_at.map(|at| at.elapsed())
    }
}
