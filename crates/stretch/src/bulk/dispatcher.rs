//! 🗑️ Flush dispatcher: N send workers, one queue of N slots, zero retries.
//!
//! Patient, tireless, and deeply unbothered by the chaos upstream. A worker
//! receives a batch. It sends the batch. If the send fails it counts the failure,
//! tells the error sink, drops the batch and goes back for the next one.
//! It does not retry. It does not escalate. It only sends.
//!
//! ⚠️ The queue has exactly as many slots as there are workers. When every worker
//! is mid-request and every slot is full, whoever is flushing waits. That wait is
//! the whole memory bound of the pipeline, and it travels all the way back to `submit`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Worker;
use super::accumulator::{FlushBatch, FlushCause};
use crate::error::{Result, StretchError};
use crate::transport::{Method, Transport};

/// 📊 What a successful send learned from the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Items the server accepted the request for but refused individually.
    pub rejected_items: usize,
}

/// 📡 Sends one finished bulk body somewhere.
///
/// # Contract
/// - Called concurrently from every send worker, one distinct body per call.
/// - `Err` means the whole batch is lost. No retries happen above this trait.
#[async_trait]
pub trait BulkSender: Send + Sync + std::fmt::Debug {
    async fn send_bulk(&self, body: Vec<u8>) -> Result<SendReport>;
}

/// 📡 The default sender: POST the body to `/_bulk` through a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportBulkSender {
    transport: Arc<dyn Transport>,
}

impl TransportBulkSender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// 🔍 Count the items whose status is not 2xx. Unparseable bodies count as zero.
fn count_rejected_items(response: &[u8]) -> usize {
    let Ok(parsed) = serde_json::from_slice::<BulkResponse>(response) else {
        return 0;
    };
    if !parsed.errors {
        return 0;
    }
    parsed
        .items
        .iter()
        .filter_map(|item| item.values().next())
        .filter(|result| {
            result
                .get("status")
                .and_then(serde_json::Value::as_u64)
                .is_some_and(|status| !(200..300).contains(&status))
        })
        .count()
}

#[async_trait]
impl BulkSender for TransportBulkSender {
    async fn send_bulk(&self, body: Vec<u8>) -> Result<SendReport> {
        let response = self.transport.execute(Method::POST, "/_bulk", Some(body)).await?;
        let rejected_items = count_rejected_items(&response);
        if rejected_items > 0 {
            // -- ⚠️ The request landed, some documents did not. Not a transport failure.
            warn!("⚠️ bulk request accepted but {} item(s) were rejected", rejected_items);
        }
        Ok(SendReport { rejected_items })
    }
}

/// 💀 One failed send, as delivered to the error sink.
#[derive(Debug)]
pub struct BulkSendError {
    pub error: StretchError,
    pub doc_count: usize,
    pub cause: FlushCause,
}

/// 📊 Shared counters. Monotonic, lock-free, read by `BulkIndexer::stats`.
#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub(crate) docs_submitted: AtomicU64,
    pub(crate) threshold_flushes: AtomicU64,
    pub(crate) timer_flushes: AtomicU64,
    pub(crate) manual_flushes: AtomicU64,
    pub(crate) batches_sent: AtomicU64,
    pub(crate) docs_sent: AtomicU64,
    pub(crate) send_errors: AtomicU64,
    pub(crate) docs_failed: AtomicU64,
    pub(crate) rejected_items: AtomicU64,
    /// Accepted but never acknowledged: left behind by a shutdown that hit its deadline.
    pub(crate) docs_abandoned: AtomicU64,
}

impl PipelineCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// 🗑️ One send worker: drain the dispatch queue until it is closed and empty.
pub(crate) struct SendWorker {
    worker_id: usize,
    rx: Receiver<FlushBatch>,
    sender: Arc<dyn BulkSender>,
    counters: Arc<PipelineCounters>,
    error_sink: Sender<BulkSendError>,
}

impl SendWorker {
    pub(crate) fn new(
        worker_id: usize,
        rx: Receiver<FlushBatch>,
        sender: Arc<dyn BulkSender>,
        counters: Arc<PipelineCounters>,
        error_sink: Sender<BulkSendError>,
    ) -> Self {
        Self {
            worker_id,
            rx,
            sender,
            counters,
            error_sink,
        }
    }

    async fn send_one(&self, batch: FlushBatch) {
        let FlushBatch {
            body,
            doc_count,
            cause,
        } = batch;
        debug!(
            "📡 send worker {} shipping {} docs ({} bytes, {:?} flush)",
            self.worker_id,
            doc_count,
            body.len(),
            cause
        );

        match self.sender.send_bulk(body).await {
            Ok(report) => {
                PipelineCounters::bump(&self.counters.batches_sent, 1);
                PipelineCounters::bump(&self.counters.docs_sent, doc_count as u64);
                PipelineCounters::bump(&self.counters.rejected_items, report.rejected_items as u64);
            }
            Err(error) => {
                PipelineCounters::bump(&self.counters.send_errors, 1);
                PipelineCounters::bump(&self.counters.docs_failed, doc_count as u64);
                warn!(
                    "💀 send worker {} dropped a batch of {} docs: {}",
                    self.worker_id, doc_count, error
                );
                let failure = BulkSendError {
                    error,
                    doc_count,
                    cause,
                };
                // -- nobody listening, or the sink is full: the counter already has it
                if let Err(TrySendError::Full(_)) = self.error_sink.try_send(failure) {
                    debug!("🪣 error sink is full, failure recorded in the counter only");
                }
            }
        }
    }
}

impl Worker for SendWorker {
    fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("📥 send worker {} started draining the dispatch queue", self.worker_id);
            while let Ok(batch) = self.rx.recv().await {
                self.send_one(batch).await;
            }
            debug!("🏁 send worker {}: queue closed and drained. Shutting down.", self.worker_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::in_mem::InMemorySender;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn batch(body: &str, doc_count: usize) -> FlushBatch {
        FlushBatch {
            body: body.as_bytes().to_vec(),
            doc_count,
            cause: FlushCause::Threshold,
        }
    }

    #[test]
    fn the_one_where_only_non_2xx_items_count_as_rejected() {
        let response = br#"{"took":3,"errors":true,"items":[
            {"index":{"_index":"i","_id":"1","status":201}},
            {"index":{"_index":"i","_id":"2","status":400,"error":{"type":"mapper_parsing_exception"}}},
            {"index":{"_index":"i","_id":"3","status":429}}
        ]}"#;
        assert_eq!(count_rejected_items(response), 2);
        assert_eq!(count_rejected_items(br#"{"errors":false,"items":[]}"#), 0);
        assert_eq!(count_rejected_items(b"not json at all"), 0);
    }

    #[tokio::test]
    async fn the_one_where_the_transport_sender_posts_to_bulk() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"errors":true,"items":[{"index":{"status":409}}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let transport = crate::transport::HttpTransport::new(crate::transport::ConnectionConfig {
            url: server.uri(),
            ..Default::default()
        })?;
        let sender = TransportBulkSender::new(Arc::new(transport));
        let report = sender.send_bulk(b"{\"index\":{}}\n{}\n".to_vec()).await?;
        assert_eq!(report.rejected_items, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_send_is_counted_reported_and_survived() {
        let sender = InMemorySender::new().failing_on([1]);
        let counters = Arc::new(PipelineCounters::default());
        let (tx, rx) = async_channel::bounded(1);
        let (err_tx, err_rx) = async_channel::bounded(4);
        let handle =
            SendWorker::new(0, rx, Arc::new(sender.clone()), counters.clone(), err_tx).start();

        tx.send(batch("first\n", 1)).await.expect("💀 queue open");
        tx.send(batch("second\n", 1)).await.expect("💀 queue open");
        tx.close();
        handle.await.expect("💀 worker should exit cleanly");

        assert_eq!(PipelineCounters::read(&counters.send_errors), 1);
        assert_eq!(PipelineCounters::read(&counters.docs_failed), 1);
        assert_eq!(PipelineCounters::read(&counters.batches_sent), 1);
        assert_eq!(sender.batches(), vec![b"second\n".to_vec()]);
        let reported = err_rx.try_recv().expect("💀 error sink should hold the failure");
        assert_eq!(reported.doc_count, 1);
        assert!(reported.error.is_transport());
    }
}
