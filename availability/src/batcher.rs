//! Debounced batching shared by both resolver stages.
//!
//! Ids are appended to a queue. The first id queued while the stage is idle
//! arms a single timer task; when it fires, up to `max_batch_size` queued
//! entries are deduplicated into one batch and handed to the stage's
//! [`BatchProcessor`]. The timer task keeps running while the queue is
//! non-empty and exits (disarming the stage) once it drains. A rate-limited
//! batch goes back to the front of the queue and the next flush waits for the
//! backoff delay instead of the normal interval.
//!
//! The stage stays armed while a batch is in flight, so each stage has at most
//! one outstanding request. Ids queued meanwhile wait for the next flush.

use crate::metrics_defs::{BATCH_RATE_LIMITED, BATCH_SENT, BATCH_SIZE};
use crate::waiters::Namespace;
use crate::{counter, histogram};
use async_trait::async_trait;
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Upper bound accepted by both endpoints.
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Delay between arming and the flush, and between consecutive flushes.
    pub interval: Duration,
    /// Delay before retrying a batch rejected with 429.
    pub backoff: Duration,
    pub max_batch_size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    Completed,
    RateLimited,
}

#[async_trait]
pub(crate) trait BatchProcessor: Send + Sync + 'static {
    /// Sends one batch of distinct ids and delivers its results. Only
    /// `RateLimited` leaves the batch's waiters parked.
    async fn process(&self, batch: &[u64]) -> FlushOutcome;
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<u64>,
    // A timer task exists iff armed.
    armed: bool,
}

pub(crate) struct Batcher<P> {
    stage: Namespace,
    policy: BatchPolicy,
    processor: P,
    state: Mutex<QueueState>,
    runtime: Handle,
}

impl<P: BatchProcessor> Batcher<P> {
    /// Must be called from within a Tokio runtime; timer tasks are spawned
    /// onto it.
    pub fn new(stage: Namespace, policy: BatchPolicy, processor: P) -> Arc<Self> {
        Arc::new(Batcher {
            stage,
            policy,
            processor,
            state: Mutex::new(QueueState::default()),
            runtime: Handle::current(),
        })
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Appends `id` to the queue and arms the timer if the stage is idle.
    pub fn enqueue(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        state.queue.push_back(id);
        if !state.armed {
            state.armed = true;
            self.spawn_timer(self.policy.interval);
        }
    }

    pub fn queued(&self) -> Vec<u64> {
        self.state.lock().queue.iter().copied().collect()
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    fn spawn_timer(self: &Arc<Self>, delay: Duration) {
        let batcher = Arc::clone(self);
        self.runtime.spawn(async move {
            let mut timer = TimerTask {
                batcher,
                finished: false,
            };
            let mut delay = delay;
            loop {
                tokio::time::sleep(delay).await;
                match timer.batcher.flush().await {
                    Some(next) => delay = next,
                    None => break,
                }
            }
            timer.finished = true;
        });
    }

    /// Called when a timer task ends without disarming, e.g. after a panic
    /// inside `process`. Keeps the stage able to flush what is still queued.
    fn timer_lost(self: &Arc<Self>) {
        let mut state = self.state.lock();
        tracing::warn!(
            stage = self.stage.as_str(),
            queued = state.queue.len(),
            "batch timer stopped unexpectedly"
        );
        if state.queue.is_empty() {
            state.armed = false;
        } else {
            self.spawn_timer(self.policy.interval);
        }
    }

    /// Runs one batch. Returns the delay until the next flush, or `None` after
    /// disarming because the queue is empty.
    async fn flush(&self) -> Option<Duration> {
        let batch: Vec<u64> = {
            let mut state = self.state.lock();
            if state.queue.is_empty() {
                state.armed = false;
                return None;
            }
            let take = state.queue.len().min(self.policy.max_batch_size);
            let distinct: IndexSet<u64> = state.queue.drain(..take).collect();
            distinct.into_iter().collect()
        };

        let stage = self.stage.as_str();
        counter!(BATCH_SENT, "stage" => stage).increment(1);
        histogram!(BATCH_SIZE, "stage" => stage).record(batch.len() as f64);
        tracing::debug!(stage, size = batch.len(), "flushing batch");

        let outcome = self.processor.process(&batch).await;

        let mut state = self.state.lock();
        match outcome {
            FlushOutcome::RateLimited => {
                counter!(BATCH_RATE_LIMITED, "stage" => stage).increment(1);
                tracing::warn!(
                    stage,
                    size = batch.len(),
                    backoff_ms = self.policy.backoff.as_millis() as u64,
                    "rate limited, requeueing batch"
                );
                for id in batch.into_iter().rev() {
                    state.queue.push_front(id);
                }
                Some(self.policy.backoff)
            }
            FlushOutcome::Completed if state.queue.is_empty() => {
                state.armed = false;
                None
            }
            FlushOutcome::Completed => Some(self.policy.interval),
        }
    }
}

struct TimerTask<P: BatchProcessor> {
    batcher: Arc<Batcher<P>>,
    finished: bool,
}

impl<P: BatchProcessor> Drop for TimerTask<P> {
    fn drop(&mut self) {
        if !self.finished {
            self.batcher.timer_lost();
        }
    }
}
