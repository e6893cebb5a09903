//! 📦 A sender that never forgets. Every body it is handed lands in a `Vec`.
//!
//! Great for assertions, great for `--dry-run`, great for trust issues.
//! Optionally it can be told to hold every send until a semaphore grants a permit
//! (to fake a slow cluster) or to fail specific calls (to fake a grumpy one).
//!
//! ⚠️ This is NOT a production sink. If you're deploying this to prod, please also
//! deploy a therapist.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::dispatcher::{BulkSender, SendReport};
use super::encoder::{DecodedAction, decode_actions};
use crate::error::{Result, StretchError};

/// 📦 In-memory [`BulkSender`]. Clone it, hand one copy to the indexer, inspect the other.
#[derive(Debug, Clone, Default)]
pub struct InMemorySender {
    batches: Arc<Mutex<Vec<Vec<u8>>>>,
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    fail_on: Arc<HashSet<usize>>,
}

impl InMemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// ⏳ Every send consumes one permit from `gate` before it completes.
    ///
    /// Permits are never given back, so `add_permits(n)` lets exactly `n` more sends through.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// 💀 Fail these calls (1-based, in the order sends start).
    pub fn failing_on(mut self, call_numbers: impl IntoIterator<Item = usize>) -> Self {
        self.fail_on = Arc::new(call_numbers.into_iter().collect());
        self
    }

    /// 📦 Bodies of every successful send, in completion order.
    pub fn batches(&self) -> Vec<Vec<u8>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 🔍 Every successfully sent action, decoded, batch after batch.
    pub fn documents(&self) -> Result<Vec<DecodedAction>> {
        let mut all = Vec::new();
        for body in self.batches() {
            all.extend(decode_actions(&body)?);
        }
        Ok(all)
    }

    /// 🔢 Sends attempted so far, failures included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkSender for InMemorySender {
    async fn send_bulk(&self, body: Vec<u8>) -> Result<SendReport> {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| StretchError::Transport("in-memory gate was closed".to_string()))?
                .forget();
        }

        if self.fail_on.contains(&call_number) {
            return Err(StretchError::Transport(format!(
                "in-memory sender told to fail call #{call_number}"
            )));
        }

        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(body);
        Ok(SendReport::default())
    }
}
