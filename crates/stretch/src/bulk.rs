//! 🎬 *[a channel fills with documents. somewhere, a buffer waits.]*
//! *[a timer ticks. four workers stare at an empty queue.]*
//! *[nobody asked for this many log lines. and yet, here we are.]*
//!
//! 📦 The bulk pipeline: documents in one end, `_bulk` requests out the other.
//!
//! 🧠 Knowledge graph:
//! ```text
//!   submit() ─encode─▶ intake queue ─▶ IntakeWorker ─┐
//!                                                    ├─ lock ─▶ Accumulator ─take─▶ dispatch queue ─▶ SendWorker × N ─▶ BulkSender
//!                                       FlushTimer ──┘
//! ```
//! - `encoder`: document → two NDJSON lines (and back again, for tests and audits)
//! - `accumulator`: the buffer + thresholds, never locks on its own
//! - `dispatcher`: N send workers behind a queue of N slots (backpressure, not bloat)
//! - `timer`: the "you've waited long enough" flush, gated by [`TimerGate`]
//! - `indexer`: the orchestrator, lifecycle and the one lock that rules them all
//! - `in_mem`: a sender that keeps batches in RAM, for tests and dry runs 🦆

use tokio::task::JoinHandle;

mod accumulator;
mod config;
mod dispatcher;
mod encoder;
mod in_mem;
mod indexer;
mod intake;
mod timer;

pub use accumulator::{FlushBatch, FlushCause};
pub use config::{BulkConfig, TimerGate};
pub use dispatcher::{BulkSendError, BulkSender, SendReport, TransportBulkSender};
pub use encoder::{BulkDocument, DecodedAction, Payload, decode_actions, encode_action};
pub use in_mem::InMemorySender;
pub use indexer::{BulkIndexer, BulkStats, LifecycleState};

/// 🏗️ A background task that does work. duh.
///
/// Every long-lived piece of the pipeline (send workers, the intake loop, the
/// timer) is one of these: build it with its channels, call `start`, keep the handle.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<()>;
}
