//! 🎬 The Bulk Indexer: part middle manager, part air traffic controller.
//!
//! It owns the buffer, the timer and the send workers, and it holds the one lock
//! that keeps them from stepping on each other. Callers only ever see `submit`,
//! `flush_now` and `shutdown`. Everything else is its private little minions.
//!
//! 🧠 Knowledge graph:
//! - Lifecycle: `Unstarted → Running → ShuttingDown → Stopped`. No skipping ahead.
//! - Lock: one `tokio::sync::Mutex<BufferState>`. Held for appends, swaps and the
//!   hand-off to the dispatch queue. Never held across a network send.
//! - Backpressure: intake queue (`intake_capacity`) ← buffer lock ← dispatch queue (`workers`).
//! - Shutdown: close intake → drain it → stop timer → final flush → close dispatch
//!   → wait for sends. One `shutdown_timeout` deadline covers every step; tasks
//!   still busy at the deadline are aborted and their docs counted as abandoned.
//! - The indexer is a cheap `Clone` handle. Share it instead of reaching for a global. 🦆

use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use async_channel::{Receiver, Sender};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use super::Worker;
use super::accumulator::{Accumulator, FlushBatch, FlushCause};
use super::config::BulkConfig;
use super::dispatcher::{
    BulkSendError, BulkSender, PipelineCounters, SendWorker, TransportBulkSender,
};
use super::encoder::{BulkDocument, Payload, encode_action};
use super::intake::IntakeWorker;
use super::timer::FlushTimer;
use crate::error::{Result, StretchError};
use crate::transport::Transport;

// 🪣 Failed sends waiting for someone to read them. Overflow is counted, not queued.
const ERROR_SINK_CAPACITY: usize = 64;

/// 🚦 Where the indexer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// 📊 A snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub docs_submitted: u64,
    pub threshold_flushes: u64,
    pub timer_flushes: u64,
    pub manual_flushes: u64,
    pub batches_sent: u64,
    pub docs_sent: u64,
    pub send_errors: u64,
    /// Docs inside batches whose send failed.
    pub docs_failed: u64,
    pub rejected_items: u64,
    /// Docs accepted by `submit` that were neither sent nor failed when shutdown ended.
    pub docs_abandoned: u64,
}

/// 🔒 Everything the lock guards.
#[derive(Debug)]
pub(crate) struct BufferState {
    pub(crate) acc: Accumulator,
    /// Cause of the last threshold or timer flush. `None` until one happens;
    /// manual flushes leave it alone.
    pub(crate) last_flush_cause: Option<FlushCause>,
}

/// 🧵 The parts shared by the intake worker, the timer and the public handle.
#[derive(Debug)]
pub(crate) struct Pipeline {
    pub(crate) config: BulkConfig,
    pub(crate) buffer: Mutex<BufferState>,
    dispatch_tx: Sender<FlushBatch>,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    /// 🔄 Swap the buffer out and queue it for sending. Caller holds the lock.
    ///
    /// Waits for a free dispatch slot when every worker is busy. Returns false
    /// when there was nothing to flush.
    pub(crate) async fn flush_locked(&self, state: &mut BufferState, cause: FlushCause) -> bool {
        let Some(batch) = state.acc.take(cause) else {
            return false;
        };
        if cause != FlushCause::Manual {
            state.last_flush_cause = Some(cause);
        }

        let counter = match cause {
            FlushCause::Threshold => &self.counters.threshold_flushes,
            FlushCause::Timer => &self.counters.timer_flushes,
            FlushCause::Manual => &self.counters.manual_flushes,
        };
        PipelineCounters::bump(counter, 1);
        debug!(
            "🚽 {:?} flush: {} docs, {} bytes",
            cause,
            batch.doc_count,
            batch.body.len()
        );

        if let Err(closed) = self.dispatch_tx.send(batch).await {
            warn!(
                "💀 dispatch queue already closed, dropping {} docs",
                closed.into_inner().doc_count
            );
        }
        true
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: LifecycleState,
    intake: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    senders: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct Inner {
    pipeline: Arc<Pipeline>,
    sender: Arc<dyn BulkSender>,
    intake_tx: Sender<Vec<u8>>,
    intake_rx: Receiver<Vec<u8>>,
    dispatch_rx: Receiver<FlushBatch>,
    errors_tx: Sender<BulkSendError>,
    errors_rx: Receiver<BulkSendError>,
    stop_timer: watch::Sender<bool>,
    lifecycle: std::sync::Mutex<Lifecycle>,
}

/// 📦 The bulk indexer. Buffers documents and ships them to `_bulk` in batches.
///
/// ```ignore
/// let indexer = BulkIndexer::with_transport(BulkConfig::default(), transport)?;
/// indexer.start()?;
/// indexer.index("github", "PushEvent", "1", None, &event).await?;
/// let stats = indexer.shutdown().await?;
/// ```
#[derive(Debug, Clone)]
pub struct BulkIndexer {
    inner: Arc<Inner>,
}

impl BulkIndexer {
    /// 🏗️ Build an unstarted indexer around any [`BulkSender`].
    ///
    /// The intake queue exists from here on, so documents may be submitted before
    /// `start`; they wait in the queue (and eventually block) until it runs.
    pub fn new(config: BulkConfig, sender: Arc<dyn BulkSender>) -> Result<Self> {
        config.validate()?;

        let (intake_tx, intake_rx) = async_channel::bounded(config.intake_capacity);
        let (dispatch_tx, dispatch_rx) = async_channel::bounded(config.workers);
        let (errors_tx, errors_rx) = async_channel::bounded(ERROR_SINK_CAPACITY);
        let (stop_timer, _) = watch::channel(false);

        let pipeline = Arc::new(Pipeline {
            buffer: Mutex::new(BufferState {
                acc: Accumulator::new(config.max_buffer_bytes, config.max_docs),
                last_flush_cause: None,
            }),
            config,
            dispatch_tx,
            counters: Arc::new(PipelineCounters::default()),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                pipeline,
                sender,
                intake_tx,
                intake_rx,
                dispatch_rx,
                errors_tx,
                errors_rx,
                stop_timer,
                lifecycle: std::sync::Mutex::new(Lifecycle {
                    state: LifecycleState::Unstarted,
                    intake: None,
                    timer: None,
                    senders: Vec::new(),
                }),
            }),
        })
    }

    /// 📡 Build an unstarted indexer that POSTs batches to `/_bulk` over `transport`.
    pub fn with_transport(config: BulkConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::new(config, Arc::new(TransportBulkSender::new(transport)))
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle().state
    }

    pub fn config(&self) -> &BulkConfig {
        &self.inner.pipeline.config
    }

    /// 🚀 Launch the send workers, the intake worker and the timer.
    ///
    /// Must run inside a tokio runtime. A second call is [`StretchError::AlreadyStarted`].
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != LifecycleState::Unstarted {
            return Err(StretchError::AlreadyStarted);
        }
        self.start_locked(&mut lifecycle);
        Ok(())
    }

    /// 🚀 Start unless someone already did. Check and start happen under one guard.
    fn ensure_started(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == LifecycleState::Unstarted {
            self.start_locked(&mut lifecycle);
        }
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) {
        let inner = &self.inner;
        let config = &inner.pipeline.config;
        info!(
            "🚀 starting bulk indexer: {} send workers, max {} docs / {} bytes per batch",
            config.workers, config.max_docs, config.max_buffer_bytes
        );

        lifecycle.senders = (0..config.workers)
            .map(|worker_id| {
                SendWorker::new(
                    worker_id,
                    inner.dispatch_rx.clone(),
                    inner.sender.clone(),
                    inner.pipeline.counters.clone(),
                    inner.errors_tx.clone(),
                )
                .start()
            })
            .collect();
        lifecycle.intake =
            Some(IntakeWorker::new(inner.intake_rx.clone(), inner.pipeline.clone()).start());
        lifecycle.timer =
            Some(FlushTimer::new(inner.pipeline.clone(), inner.stop_timer.subscribe()).start());
        lifecycle.state = LifecycleState::Running;
    }

    /// ⏳ Start (if needed), park until `shutdown_signal` resolves, then shut down cleanly.
    pub async fn run_until<F>(&self, shutdown_signal: F) -> Result<BulkStats>
    where
        F: Future<Output = ()>,
    {
        self.ensure_started();
        shutdown_signal.await;
        info!("🛑 shutdown signal received");
        self.shutdown().await
    }

    /// 📥 Encode a document and hand it to the pipeline.
    ///
    /// Returns once the intake queue accepts it, which may mean waiting while the
    /// queue is full. Success means "accepted", not "indexed".
    pub async fn submit(&self, doc: BulkDocument) -> Result<()> {
        let encoded = encode_action(&doc)?;
        self.inner
            .intake_tx
            .send(encoded)
            .await
            .map_err(|_| StretchError::PipelineClosed)?;
        PipelineCounters::bump(&self.inner.pipeline.counters.docs_submitted, 1);
        Ok(())
    }

    /// 📥 Serialize `doc` as the JSON payload and submit it.
    pub async fn index<T: Serialize + ?Sized>(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        timestamp: Option<SystemTime>,
        doc: &T,
    ) -> Result<()> {
        let mut bulk_doc = BulkDocument::new(index, doc_type, id, Payload::json(doc)?);
        bulk_doc.timestamp = timestamp;
        self.submit(bulk_doc).await
    }

    /// 🚽 Flush whatever is buffered right now, thresholds be damned.
    ///
    /// Returns true if a batch was queued. Waits for a dispatch slot if needed.
    pub async fn flush_now(&self) -> bool {
        let pipeline = &self.inner.pipeline;
        let mut state = pipeline.buffer.lock().await;
        pipeline.flush_locked(&mut state, FlushCause::Manual).await
    }

    /// 🛑 Stop intake, drain it, flush the rest, and wait for in-flight sends.
    ///
    /// The whole sequence shares one `shutdown_timeout` deadline. Workers still busy
    /// when it passes are aborted, and the documents they held show up in
    /// [`BulkStats::docs_abandoned`]. Safe to call more than once and from several
    /// handles; only the first call does the work, the rest return the current stats.
    pub async fn shutdown(&self) -> Result<BulkStats> {
        // -- queued documents deserve a ride too
        self.ensure_started();

        let (intake, timer, senders) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != LifecycleState::Running {
                return Ok(self.stats());
            }
            lifecycle.state = LifecycleState::ShuttingDown;
            (
                lifecycle.intake.take(),
                lifecycle.timer.take(),
                std::mem::take(&mut lifecycle.senders),
            )
        };
        let budget = self.config().shutdown_timeout();
        let deadline = Instant::now() + budget;
        info!("🛑 bulk indexer shutting down, {:?} to finish", budget);

        // (a) stop intake and let the intake worker drain what was already accepted
        self.inner.intake_tx.close();
        if let Some(intake) = intake {
            finish_by(intake, deadline, "intake worker").await;
        }

        // (b) no more timer flushes
        let _ = self.inner.stop_timer.send(true);
        if let Some(timer) = timer {
            finish_by(timer, deadline, "flush timer").await;
        }

        // (c) the last partial batch
        if timeout_at(deadline, self.flush_now()).await.is_err() {
            warn!("⏳ final flush did not get a dispatch slot before the deadline");
        }

        // (d) workers finish what is queued, then see the closed queue and exit
        self.inner.pipeline.dispatch_tx.close();
        let aborted = join_by(senders, deadline).await;
        if aborted > 0 {
            warn!(
                "⏳ {} send worker(s) still busy after {:?}, aborted",
                aborted, budget
            );
        }

        let counters = &self.inner.pipeline.counters;
        let accounted_for =
            PipelineCounters::read(&counters.docs_sent) + PipelineCounters::read(&counters.docs_failed);
        let abandoned = PipelineCounters::read(&counters.docs_submitted).saturating_sub(accounted_for);
        if abandoned > 0 {
            PipelineCounters::bump(&counters.docs_abandoned, abandoned);
            warn!("💀 {} accepted docs were never sent", abandoned);
        }

        self.lifecycle().state = LifecycleState::Stopped;
        let stats = self.stats();
        info!("🏁 bulk indexer stopped: {:?}", stats);
        Ok(stats)
    }

    pub fn stats(&self) -> BulkStats {
        let counters = &self.inner.pipeline.counters;
        let read = PipelineCounters::read;
        BulkStats {
            docs_submitted: read(&counters.docs_submitted),
            threshold_flushes: read(&counters.threshold_flushes),
            timer_flushes: read(&counters.timer_flushes),
            manual_flushes: read(&counters.manual_flushes),
            batches_sent: read(&counters.batches_sent),
            docs_sent: read(&counters.docs_sent),
            send_errors: read(&counters.send_errors),
            docs_failed: read(&counters.docs_failed),
            rejected_items: read(&counters.rejected_items),
            docs_abandoned: read(&counters.docs_abandoned),
        }
    }

    /// 💀 Total failed sends since construction. Only ever goes up.
    pub fn send_error_count(&self) -> u64 {
        PipelineCounters::read(&self.inner.pipeline.counters.send_errors)
    }

    /// 🪣 The error sink: one [`BulkSendError`] per failed send (while there is room).
    pub fn errors(&self) -> Receiver<BulkSendError> {
        self.inner.errors_rx.clone()
    }
}

/// ⏳ Await one task until `deadline`, aborting it if it is still running then.
async fn finish_by(mut handle: JoinHandle<()>, deadline: Instant, what: &str) {
    match timeout_at(deadline, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("💀 {} ended badly: {}", what, err),
        Err(_) => {
            handle.abort();
            warn!("⏳ {} still busy at the shutdown deadline, aborted", what);
        }
    }
}

/// ⏳ Await every handle until `deadline`. Returns how many had to be aborted.
async fn join_by(mut handles: Vec<JoinHandle<()>>, deadline: Instant) -> usize {
    if timeout_at(deadline, join_all(handles.iter_mut())).await.is_ok() {
        return 0;
    }
    let mut aborted = 0;
    for handle in &handles {
        if !handle.is_finished() {
            handle.abort();
            aborted += 1;
        }
    }
    aborted
}
