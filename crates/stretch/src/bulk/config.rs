//! 🔧 Bulk tunables: the knobs, the dials, the "why is it flushing so often" settings.
//!
//! 🧠 Knowledge graph:
//! - `BulkConfig` is handed to `BulkIndexer::new` and never mutated after that.
//!   No process-wide statics. Two indexers, two configs, zero races.
//! - serde defaults come from `default_*` fns; `Default` agrees with them
//!   (we learned that lesson the hard way). 🦆
//! - Aliases keep old knob names working: `bulk_max_buffer`, `bulk_max_docs`,
//!   `bulk_delay_seconds`, `max_conns`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StretchError};

/// ⏱️ When is the timer allowed to force a flush of a non-empty buffer?
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerGate {
    /// Only while no flush has happened yet or the last one was the timer's.
    /// After the first size/count threshold flush the timer stands down for good.
    /// Manual flushes leave the gate as it was.
    #[default]
    LastFlushCause,
    /// Whenever the oldest buffered document has waited at least one interval.
    DocumentAge,
}

/// 📦 Everything the bulk pipeline needs to know about batch shape and pace.
#[derive(Debug, Deserialize, Clone)]
pub struct BulkConfig {
    /// 📦 Flush once the buffer holds at least this many bytes.
    #[serde(default = "default_max_buffer_bytes", alias = "bulk_max_buffer")]
    pub max_buffer_bytes: usize,
    /// 📦 Flush once the buffer holds at least this many documents.
    #[serde(default = "default_max_docs", alias = "bulk_max_docs")]
    pub max_docs: usize,
    /// ⏱️ Timer tick, in seconds.
    #[serde(default = "default_flush_interval_secs", alias = "bulk_delay_seconds")]
    pub flush_interval_secs: u64,
    /// 🧵 Concurrent bulk requests in flight (and dispatcher queue slots).
    #[serde(default = "default_workers", alias = "max_conns")]
    pub workers: usize,
    /// ✉️ Encoded documents waiting between `submit` and the buffer.
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
    #[serde(default)]
    pub timer_gate: TimerGate,
    /// ⏳ The whole budget for `shutdown`: draining intake, the final flush and
    /// in-flight sends. Whatever is still pending when it runs out is abandoned.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

// 📦 1MB. 1048576 bytes. The comment is doing the math so you don't have to.
fn default_max_buffer_bytes() -> usize {
    1024 * 1024
}

fn default_max_docs() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_workers() -> usize {
    4
}

fn default_intake_capacity() -> usize {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: default_max_buffer_bytes(),
            max_docs: default_max_docs(),
            flush_interval_secs: default_flush_interval_secs(),
            workers: default_workers(),
            intake_capacity: default_intake_capacity(),
            timer_gate: TimerGate::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl BulkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// 🔒 Zeroes here would mean a pipeline that deadlocks or spins. Refuse them up front.
    pub fn validate(&self) -> Result<()> {
        let zero_knob = [
            ("max_buffer_bytes", self.max_buffer_bytes == 0),
            ("max_docs", self.max_docs == 0),
            ("flush_interval_secs", self.flush_interval_secs == 0),
            ("workers", self.workers == 0),
            ("intake_capacity", self.intake_capacity == 0),
        ]
        .into_iter()
        .find(|(_, is_zero)| *is_zero);

        match zero_knob {
            Some((name, _)) => Err(StretchError::Config(format!("{name} must be greater than zero"))),
            None => Ok(()),
        }
    }
}
