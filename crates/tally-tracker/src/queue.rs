//! Priority batch queue for counter updates.
//!
//! Lifecycle: idle, accumulating, flushing, idle again. A flush is
//! requested two ways:
//! - reaching `max_batch_size` schedules one debounced flush, so a burst of
//!   enqueues collapses into a single flush;
//! - a periodic timer flushes whatever is pending.
//!
//! High-priority operations go ahead of all normal ones; each class is FIFO.
//! A failed operation goes to the back of the queue with `retry_count + 1`
//! until it has been retried [`MAX_RETRIES`] times, then it is dropped and
//! only reported in the flush result.
//!
//! State lives behind mutexes that are never held across an `.await`, so
//! every queue mutation runs to completion before another can start.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tally_core::{FailedOperation, Priority, ProcessResult, TallyError, UpdateOperation, MAX_RETRIES};

use crate::sink::OperationSink;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Called with the result of every non-empty flush.
pub type FlushCallback = Arc<dyn Fn(&ProcessResult) + Send + Sync>;

type CallbackList = Mutex<Vec<(u64, FlushCallback)>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`BatchQueue::on_flush_complete`].
#[derive(Debug)]
pub struct Subscription {
    callbacks: Weak<CallbackList>,
    id: u64,
}

impl Subscription {
    /// Stop receiving flush results.
    pub fn unsubscribe(self) {
        if let Some(list) = self.callbacks.upgrade() {
            lock(&list).retain(|(id, _)| *id != self.id);
        }
    }
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub high_priority: usize,
    pub normal_priority: usize,
    pub flushing: bool,
    pub paused: bool,
    pub running: bool,
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct QueueState {
    ops: VecDeque<UpdateOperation>,
    max_batch_size: usize,
    flush_interval: Duration,
    debounce: Duration,
    paused: bool,
    flushing: bool,
}

#[derive(Debug, Default)]
struct Timers {
    running: bool,
    periodic: Option<JoinHandle<()>>,
    debounce: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort_all(&mut self) {
        if let Some(handle) = self.periodic.take() {
            handle.abort();
        }
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
    }
}

struct Shared<S> {
    sink: S,
    state: Mutex<QueueState>,
    callbacks: Arc<CallbackList>,
    next_callback_id: AtomicU64,
    timers: Mutex<Timers>,
}

/// Operations taken off the queue for one flush. Whatever has not been
/// applied when this is dropped goes back to the front of the queue, and
/// the flushing flag is cleared, even if the flush future is cancelled.
struct InFlight<'a> {
    state: &'a Mutex<QueueState>,
    pending: VecDeque<UpdateOperation>,
    current: Option<UpdateOperation>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        for op in self.pending.drain(..).rev() {
            state.ops.push_front(op);
        }
        if let Some(op) = self.current.take() {
            state.ops.push_front(op);
        }
        state.flushing = false;
    }
}

impl<S: OperationSink> Shared<S> {
    async fn flush(&self) -> ProcessResult {
        let batch = {
            let mut state = lock(&self.state);
            if state.flushing || state.ops.is_empty() {
                return ProcessResult::empty();
            }
            state.flushing = true;
            let take = state.max_batch_size.min(state.ops.len());
            state.ops.drain(..take).collect::<VecDeque<_>>()
        };

        let started = std::time::Instant::now();
        let mut result = ProcessResult::empty();
        let mut in_flight = InFlight {
            state: &self.state,
            pending: batch,
            current: None,
        };

        while let Some(op) = in_flight.pending.pop_front() {
            in_flight.current = Some(op.clone());
            let outcome = self.sink.apply(&op).await;
            in_flight.current = None;

            result.processed_count += 1;
            let source = match outcome {
                Ok(()) => {
                    result.success_count += 1;
                    continue;
                }
                Err(source) => source,
            };

            result.failure_count += 1;
            let error = TallyError::BatchOperation {
                path: op.path().to_string(),
                source,
            };
            result.failures.push(FailedOperation {
                operation: op.clone(),
                error_message: error.to_string(),
                failed_at: Utc::now(),
            });

            if op.can_retry() {
                let mut retry = op;
                retry.retry_count += 1;
                warn!(path = %retry.path(), retry = retry.retry_count, error = %error, "update failed, requeued");
                lock(&self.state).ops.push_back(retry);
            } else {
                warn!(path = %op.path(), error = %error, "update failed after {MAX_RETRIES} retries, dropped");
            }
        }
        drop(in_flight);

        result.processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            processed = result.processed_count,
            succeeded = result.success_count,
            failed = result.failure_count,
            ms = result.processing_time_ms,
            "flush complete"
        );
        self.notify(&result);
        result
    }

    fn notify(&self, result: &ProcessResult) {
        let callbacks: Vec<FlushCallback> = lock(&self.callbacks)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                warn!("flush completion callback panicked");
            }
        }
    }
}

// Runs the flush on its own task so aborting a timer never cancels a flush
// that has already started.
async fn run_flush<S: OperationSink + 'static>(shared: Arc<Shared<S>>) {
    let _ = tokio::spawn(async move { shared.flush().await }).await;
}

fn spawn_periodic<S: OperationSink + 'static>(shared: &Arc<Shared<S>>, period: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let idle = lock(&shared.state).ops.is_empty();
            if idle {
                continue;
            }
            run_flush(shared).await;
        }
    })
}

/// Ordered, priority-aware queue of pending [`UpdateOperation`]s.
pub struct BatchQueue<S: OperationSink + 'static> {
    shared: Arc<Shared<S>>,
}

impl<S: OperationSink + 'static> BatchQueue<S> {
    pub fn new(sink: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                state: Mutex::new(QueueState {
                    ops: VecDeque::new(),
                    max_batch_size: DEFAULT_MAX_BATCH_SIZE,
                    flush_interval: DEFAULT_FLUSH_INTERVAL,
                    debounce: DEFAULT_DEBOUNCE,
                    paused: false,
                    flushing: false,
                }),
                callbacks: Arc::new(Mutex::new(Vec::new())),
                next_callback_id: AtomicU64::new(0),
                timers: Mutex::new(Timers::default()),
            }),
        }
    }

    #[must_use]
    pub fn with_max_batch_size(self, max_batch_size: usize) -> Self {
        self.set_max_batch_size(max_batch_size);
        self
    }

    #[must_use]
    pub fn with_flush_interval(self, interval: Duration) -> Self {
        self.set_flush_interval(interval);
        self
    }

    #[must_use]
    pub fn with_debounce(self, debounce: Duration) -> Self {
        self.set_debounce(debounce);
        self
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    /// Queue an operation. Returns `false` (and drops it) while paused.
    pub fn enqueue(&self, op: UpdateOperation) -> bool {
        let threshold_reached = {
            let mut state = lock(&self.shared.state);
            if state.paused {
                debug!(path = %op.path(), "queue paused, operation ignored");
                return false;
            }
            match op.priority {
                Priority::High => {
                    let at = state
                        .ops
                        .iter()
                        .position(|queued| queued.priority != Priority::High)
                        .unwrap_or(state.ops.len());
                    state.ops.insert(at, op);
                }
                Priority::Normal => state.ops.push_back(op),
            }
            state.ops.len() >= state.max_batch_size
        };

        if threshold_reached {
            self.schedule_debounced_flush();
        }
        true
    }

    fn schedule_debounced_flush(&self) {
        let mut timers = lock(&self.shared.timers);
        if !timers.running || timers.debounce.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let delay = lock(&self.shared.state).debounce;
        let weak = Arc::downgrade(&self.shared);
        debug!(?delay, "batch size reached, flush scheduled");
        timers.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                run_flush(shared).await;
            }
        }));
    }

    /// Apply up to `max_batch_size` operations from the front of the queue.
    ///
    /// Returns an empty result without doing anything if the queue is empty
    /// or another flush is in progress.
    pub async fn flush(&self) -> ProcessResult {
        self.shared.flush().await
    }

    /// Start the periodic flush timer and enable debounced flushes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let (period, paused) = {
            let state = lock(&self.shared.state);
            (state.flush_interval, state.paused)
        };
        let mut timers = lock(&self.shared.timers);
        if timers.running {
            return;
        }
        timers.running = true;
        if !paused {
            timers.periodic = Some(spawn_periodic(&self.shared, period));
        }
        debug!(?period, "batch queue started");
    }

    /// Stop both timers. A flush already running is not interrupted.
    pub fn stop(&self) {
        let mut timers = lock(&self.shared.timers);
        timers.running = false;
        timers.abort_all();
    }

    /// Ignore new operations and halt the timers until [`BatchQueue::resume`].
    pub fn pause(&self) {
        lock(&self.shared.state).paused = true;
        lock(&self.shared.timers).abort_all();
    }

    /// Accept operations again and restart the periodic timer. Ticks missed
    /// while paused are not replayed.
    pub fn resume(&self) {
        let period = {
            let mut state = lock(&self.shared.state);
            state.paused = false;
            state.flush_interval
        };
        let mut timers = lock(&self.shared.timers);
        if timers.running && timers.periodic.is_none() {
            timers.periodic = Some(spawn_periodic(&self.shared, period));
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        lock(&self.shared.state).paused
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        lock(&self.shared.state).flushing
    }

    pub fn set_max_batch_size(&self, max_batch_size: usize) {
        lock(&self.shared.state).max_batch_size = max_batch_size.max(1);
    }

    /// Change the periodic interval, restarting the timer if it is running.
    pub fn set_flush_interval(&self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let paused = {
            let mut state = lock(&self.shared.state);
            state.flush_interval = interval;
            state.paused
        };
        let mut timers = lock(&self.shared.timers);
        if let Some(handle) = timers.periodic.take() {
            handle.abort();
        }
        if timers.running && !paused {
            timers.periodic = Some(spawn_periodic(&self.shared, interval));
        }
    }

    pub fn set_debounce(&self, debounce: Duration) {
        lock(&self.shared.state).debounce = debounce;
    }

    /// Drop every queued operation. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = lock(&self.shared.state);
        let dropped = state.ops.len();
        state.ops.clear();
        dropped
    }

    /// Register a callback for flush results.
    pub fn on_flush_complete<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProcessResult) + Send + Sync + 'static,
    {
        let id = self.shared.next_callback_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.callbacks).push((id, Arc::new(callback)));
        Subscription {
            callbacks: Arc::downgrade(&self.shared.callbacks),
            id,
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.state).ops.len()
    }

    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        let running = lock(&self.shared.timers).running;
        let state = lock(&self.shared.state);
        let high_priority = state
            .ops
            .iter()
            .filter(|op| op.priority == Priority::High)
            .count();
        QueueStatus {
            pending: state.ops.len(),
            high_priority,
            normal_priority: state.ops.len() - high_priority,
            flushing: state.flushing,
            paused: state.paused,
            running,
            max_batch_size: state.max_batch_size,
            flush_interval: state.flush_interval,
            oldest_enqueued_at: state.ops.iter().map(|op| op.enqueued_at).min(),
        }
    }

    /// Queued operations of one priority class, in queue order.
    #[must_use]
    pub fn operations_by_priority(&self, priority: Priority) -> Vec<UpdateOperation> {
        lock(&self.shared.state)
            .ops
            .iter()
            .filter(|op| op.priority == priority)
            .cloned()
            .collect()
    }

    /// The operation that has waited longest.
    #[must_use]
    pub fn oldest_operation(&self) -> Option<UpdateOperation> {
        lock(&self.shared.state)
            .ops
            .iter()
            .min_by_key(|op| op.enqueued_at)
            .cloned()
    }

    /// Distinct document paths with queued operations, in queue order.
    #[must_use]
    pub fn file_paths_queued(&self) -> Vec<String> {
        let state = lock(&self.shared.state);
        let mut paths: Vec<String> = Vec::new();
        for op in &state.ops {
            if !paths.iter().any(|p| p == op.path()) {
                paths.push(op.path().to_string());
            }
        }
        paths
    }

    /// Remove every queued operation for `path`. Returns how many were removed.
    pub fn remove_operations_for(&self, path: &str) -> usize {
        let mut state = lock(&self.shared.state);
        let before = state.ops.len();
        state.ops.retain(|op| op.path() != path);
        before - state.ops.len()
    }

    /// Sum of queued deltas for `field_key` on `path`.
    #[must_use]
    pub fn pending_delta(&self, path: &str, field_key: &str) -> i64 {
        lock(&self.shared.state)
            .ops
            .iter()
            .filter(|op| op.path() == path && op.field_key == field_key)
            .map(|op| op.delta)
            .sum()
    }
}

impl<S: OperationSink + 'static> Drop for BatchQueue<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
