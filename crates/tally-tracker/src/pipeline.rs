//! Composition root for the access pipeline.
//!
//! An access notification passes the [`PathFilter`], then the
//! [`RecencyCache`] throttle, and only then becomes an [`UpdateOperation`] on
//! the [`BatchQueue`], which eventually applies it to the
//! [`FrontmatterStore`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use tally_core::error::Result;
use tally_core::{AccessRecord, DocumentRef, ProcessResult, TrackerConfig, UpdateOperation};
use tally_vault::FrontmatterStore;

use crate::cache::{CacheStats, RecencyCache};
use crate::filter::{normalize_path, PathFilter};
use crate::queue::{BatchQueue, QueueStatus, Subscription};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// What happened to one access notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The path is outside the tracked scope.
    Filtered,
    /// The path was counted too recently.
    Throttled,
    /// An increment was queued.
    Queued,
    /// The queue is paused; nothing was recorded.
    Paused,
}

/// Owns one filter, cache, queue and store and wires them together.
pub struct AccessTracker {
    config: TrackerConfig,
    filter: PathFilter,
    cache: RecencyCache,
    queue: BatchQueue<FrontmatterStore>,
    running: bool,
}

impl AccessTracker {
    /// # Errors
    ///
    /// Returns [`tally_core::TallyError::Config`] for invalid settings and
    /// [`tally_core::TallyError::FilterConfig`] for a malformed path rule.
    pub fn new(config: TrackerConfig, store: FrontmatterStore) -> Result<Self> {
        config.validate()?;
        let filter = PathFilter::from_rules(&config.filter_rules())?;
        let cache = RecencyCache::new(config.cache_capacity).with_stale_after(config.stale_after());
        let queue = BatchQueue::new(store)
            .with_max_batch_size(config.max_batch_size)
            .with_flush_interval(config.flush_interval())
            .with_debounce(config.debounce());
        Ok(Self {
            config,
            filter,
            cache,
            queue,
            running: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    #[must_use]
    pub fn store(&self) -> &FrontmatterStore {
        self.queue.sink()
    }

    /// Start the flush timers and the stale-record sweep.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.queue.start();
        self.cache.start_periodic_cleanup(self.config.cleanup_interval());
        self.running = true;
        info!(field = %self.config.counter_field_name, "access tracker started");
    }

    /// Stop all timers, then flush until nothing is left to apply.
    pub async fn stop(&mut self) -> ProcessResult {
        self.queue.stop();
        self.cache.stop();
        self.running = false;

        let mut total = ProcessResult::empty();
        loop {
            let result = self.queue.flush().await;
            if result.is_empty() {
                // A timer-started flush may still be finishing.
                if self.queue.is_flushing() {
                    tokio::time::sleep(DRAIN_POLL).await;
                    continue;
                }
                break;
            }
            total.absorb(result);
        }
        info!(
            applied = total.success_count,
            failed = total.failure_count,
            dropped = self.queue.pending_count(),
            "access tracker stopped"
        );
        total
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn notify_access(&self, doc: DocumentRef) -> AccessOutcome {
        self.notify_access_at(doc, Utc::now())
    }

    /// [`AccessTracker::notify_access`] with an explicit clock reading.
    pub fn notify_access_at(&self, mut doc: DocumentRef, now: DateTime<Utc>) -> AccessOutcome {
        if self.queue.is_paused() {
            return AccessOutcome::Paused;
        }
        doc.path = normalize_path(&doc.path);
        if !self.filter.should_track(&doc.path) {
            debug!(path = %doc.path, "access outside tracked scope");
            return AccessOutcome::Filtered;
        }
        if !self
            .cache
            .should_process_at(&doc.path, self.config.min_interval(), now)
        {
            debug!(path = %doc.path, "access throttled");
            return AccessOutcome::Throttled;
        }
        self.cache.touch_at(&doc.path, now);
        let op = UpdateOperation::increment(doc, self.config.counter_field_name.clone());
        if self.queue.enqueue(op) {
            AccessOutcome::Queued
        } else {
            AccessOutcome::Paused
        }
    }

    /// Apply new settings to every component. Path rules are compiled first;
    /// if anything is invalid nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`tally_core::TallyError::Config`] or
    /// [`tally_core::TallyError::FilterConfig`].
    pub fn apply_config(&mut self, config: TrackerConfig) -> Result<()> {
        config.validate()?;
        let filter = PathFilter::from_rules(&config.filter_rules())?;

        self.filter = filter;
        self.cache.set_capacity(config.cache_capacity);
        self.cache.set_stale_after(config.stale_after());
        self.queue.set_max_batch_size(config.max_batch_size);
        self.queue.set_debounce(config.debounce());
        if config.flush_interval() != self.config.flush_interval() {
            self.queue.set_flush_interval(config.flush_interval());
        }
        if self.running && config.cleanup_interval() != self.config.cleanup_interval() {
            self.cache.start_periodic_cleanup(config.cleanup_interval());
        }
        self.config = config;
        debug!("tracker configuration applied");
        Ok(())
    }

    /// Stored counter value plus increments still waiting in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`tally_core::TallyError::Frontmatter`] if the document cannot be read.
    pub async fn current_count(&self, path: &str) -> Result<i64> {
        let path = normalize_path(path);
        let field = &self.config.counter_field_name;
        let stored = self.store().read_field(&DocumentRef::new(&path), field).await?;
        Ok(stored + self.queue.pending_delta(&path, field))
    }

    /// Flush one batch now.
    pub async fn flush(&self) -> ProcessResult {
        self.queue.flush().await
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub fn on_flush_complete<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProcessResult) + Send + Sync + 'static,
    {
        self.queue.on_flush_complete(callback)
    }

    /// Recency records, most recently seen first.
    #[must_use]
    pub fn records(&self) -> Vec<AccessRecord> {
        self.cache.records()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        self.queue.queue_status()
    }
}
