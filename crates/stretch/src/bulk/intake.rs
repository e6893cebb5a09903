//! 📥 Intake: the single task that moves encoded documents from the intake
//! queue into the buffer, in exactly the order `submit` handed them over.

use std::sync::Arc;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::Worker;
use super::accumulator::FlushCause;
use super::indexer::Pipeline;

pub(crate) struct IntakeWorker {
    rx: Receiver<Vec<u8>>,
    pipeline: Arc<Pipeline>,
}

impl IntakeWorker {
    pub(crate) fn new(rx: Receiver<Vec<u8>>, pipeline: Arc<Pipeline>) -> Self {
        Self { rx, pipeline }
    }
}

impl Worker for IntakeWorker {
    fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("📥 intake worker started");
            while let Ok(encoded) = self.rx.recv().await {
                let mut state = self.pipeline.buffer.lock().await;
                let must_flush = state.acc.append(&encoded);
                trace!(
                    "📦 buffered doc #{} ({} bytes in buffer)",
                    state.acc.doc_count(),
                    state.acc.len_bytes()
                );
                if must_flush {
                    // -- size/count path. Takes precedence over the timer, always.
                    self.pipeline.flush_locked(&mut state, FlushCause::Threshold).await;
                }
            }
            debug!("🏁 intake worker: queue closed and drained. Shutting down.");
        })
    }
}
