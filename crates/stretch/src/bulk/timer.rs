//! ⏱️ Flush timer: "you've waited long enough" for buffers that never fill up.
//!
//! Every `flush_interval` it takes the lock, asks the [`TimerGate`] whether it is
//! allowed to act, and if so pushes the buffer out the door. The first tick lands
//! one full interval after start, never immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use super::Worker;
use super::accumulator::FlushCause;
use super::config::TimerGate;
use super::indexer::{BufferState, Pipeline};

/// 🎯 The whole gate decision, pure and testable.
pub(crate) fn should_force_flush(gate: TimerGate, state: &BufferState, interval: Duration) -> bool {
    if state.acc.is_empty() {
        return false;
    }
    match gate {
        // -- no flush yet counts as "timer-caused"
        TimerGate::LastFlushCause => {
            matches!(state.last_flush_cause, None | Some(FlushCause::Timer))
        }
        TimerGate::DocumentAge => state
            .acc
            .oldest_doc_age()
            .is_some_and(|age| age >= interval),
    }
}

pub(crate) struct FlushTimer {
    pipeline: Arc<Pipeline>,
    stop: watch::Receiver<bool>,
}

impl FlushTimer {
    pub(crate) fn new(pipeline: Arc<Pipeline>, stop: watch::Receiver<bool>) -> Self {
        Self { pipeline, stop }
    }
}

impl Worker for FlushTimer {
    fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.pipeline.config.flush_interval();
            let gate = self.pipeline.config.timer_gate;
            info!("⏱️ starting flush timer with delay = {:?} ({:?} gate)", period, gate);

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut state = self.pipeline.buffer.lock().await;
                        if should_force_flush(gate, &state, period) {
                            self.pipeline.flush_locked(&mut state, FlushCause::Timer).await;
                        }
                    }
                    changed = self.stop.changed() => {
                        if changed.is_err() || *self.stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("🏁 flush timer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::accumulator::Accumulator;

    fn state_with(docs: usize, last_flush_cause: Option<FlushCause>) -> BufferState {
        let mut acc = Accumulator::new(1_000_000, 100);
        for _ in 0..docs {
            acc.append(b"{}\n{}\n");
        }
        BufferState {
            acc,
            last_flush_cause,
        }
    }

    #[test]
    fn the_one_where_an_empty_buffer_never_flushes() {
        let state = state_with(0, None);
        assert!(!should_force_flush(TimerGate::LastFlushCause, &state, Duration::ZERO));
        assert!(!should_force_flush(TimerGate::DocumentAge, &state, Duration::ZERO));
    }

    #[test]
    fn the_one_where_a_threshold_flush_benches_the_timer() {
        let interval = Duration::from_secs(5);
        assert!(should_force_flush(TimerGate::LastFlushCause, &state_with(1, None), interval));
        assert!(should_force_flush(
            TimerGate::LastFlushCause,
            &state_with(1, Some(FlushCause::Timer)),
            interval
        ));
        assert!(!should_force_flush(
            TimerGate::LastFlushCause,
            &state_with(1, Some(FlushCause::Threshold)),
            interval
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_document_age_ignores_the_last_flush_cause() {
        let interval = Duration::from_secs(5);
        let state = state_with(1, Some(FlushCause::Threshold));
        assert!(!should_force_flush(TimerGate::DocumentAge, &state, interval), "too young");
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(should_force_flush(TimerGate::DocumentAge, &state, interval), "old enough now");
    }
}
