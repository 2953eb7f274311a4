//! Bounded recency cache used to throttle repeated accesses.
//!
//! One [`AccessRecord`] per path. When full, the record with the oldest
//! `last_seen` is evicted. The scan is O(n), which is fine for the
//! hundreds-to-low-thousands of entries this is configured for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use tally_core::AccessRecord;

/// Records idle for longer than this are removed by the periodic sweep.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, AccessRecord>,
    capacity: usize,
    stale_after: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|r| r.last_seen)
            .map(|r| r.path.clone());
        if let Some(path) = oldest {
            self.entries.remove(&path);
            self.evictions += 1;
            debug!(path = %path, "evicted least recently seen record");
        }
    }

    fn shrink_to_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            self.evict_lru();
        }
    }

    fn cleanup_stale(&mut self, now: DateTime<Utc>) -> usize {
        let stale_after = self.stale_after;
        let before = self.entries.len();
        self.entries
            .retain(|_, r| (now - r.last_seen).to_std().map_or(true, |age| age <= stale_after));
        before - self.entries.len()
    }
}

/// Bounded map from document path to its [`AccessRecord`].
#[derive(Debug)]
pub struct RecencyCache {
    state: Arc<Mutex<CacheState>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl RecencyCache {
    /// A cache holding at most `capacity` records (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                capacity: capacity.max(1),
                stale_after: DEFAULT_STALE_AFTER,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
            cleanup: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_stale_after(self, stale_after: Duration) -> Self {
        self.lock().stale_after = stale_after;
        self
    }

    // A poisoned lock only means a panic happened mid-update; the map is
    // still structurally valid, so keep using it.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an access to `path` now should be counted.
    #[must_use]
    pub fn should_process(&self, path: &str, min_interval: Duration) -> bool {
        self.should_process_at(path, min_interval, Utc::now())
    }

    /// True for an unseen path, otherwise true once `min_interval` has
    /// passed since the path was last seen.
    #[must_use]
    pub fn should_process_at(&self, path: &str, min_interval: Duration, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        let Some(last_seen) = state.entries.get(path).map(|r| r.last_seen) else {
            state.misses += 1;
            return true;
        };
        state.hits += 1;
        match (now - last_seen).to_std() {
            Ok(elapsed) => elapsed >= min_interval,
            // Clock went backwards: treat the path as unseen.
            Err(_) => true,
        }
    }

    /// Record an access to `path` now.
    pub fn touch(&self, path: &str) {
        self.touch_at(path, Utc::now());
    }

    pub fn touch_at(&self, path: &str, now: DateTime<Utc>) {
        let mut state = self.lock();
        if let Some(record) = state.entries.get_mut(path) {
            record.touch(now);
            return;
        }
        if state.entries.len() >= state.capacity {
            state.evict_lru();
        }
        state
            .entries
            .insert(path.to_string(), AccessRecord::new(path, now));
    }

    pub fn get(&self, path: &str) -> Option<AccessRecord> {
        let mut state = self.lock();
        let record = state.entries.get(path).cloned();
        if record.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        record
    }

    pub fn remove(&self, path: &str) -> Option<AccessRecord> {
        self.lock().entries.remove(path)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, most recently seen first.
    #[must_use]
    pub fn records(&self) -> Vec<AccessRecord> {
        let mut records: Vec<AccessRecord> = self.lock().entries.values().cloned().collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.path.cmp(&b.path)));
        records
    }

    /// Change capacity (minimum 1), evicting down to the new limit at once.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.lock();
        state.capacity = capacity.max(1);
        state.shrink_to_capacity();
    }

    pub fn set_stale_after(&self, stale_after: Duration) {
        self.lock().stale_after = stale_after;
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.entries.len(),
            capacity: state.capacity,
        }
    }

    /// Remove records idle for longer than the staleness window. Returns how
    /// many were removed.
    pub fn cleanup_stale(&self, now: DateTime<Utc>) -> usize {
        self.lock().cleanup_stale(now)
    }

    /// Sweep stale records every `interval` until [`RecencyCache::stop`].
    /// Replaces any sweep already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_periodic_cleanup(&self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let weak: Weak<Mutex<CacheState>> = Arc::downgrade(&self.state);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };
                let removed = state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .cleanup_stale(Utc::now());
                if removed > 0 {
                    debug!(removed, "swept stale recency records");
                }
            }
        });

        let mut slot = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the periodic sweep, if running.
    pub fn stop(&self) {
        let mut slot = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for RecencyCache {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn throttle_allows_first_then_waits_for_interval() {
        let cache = RecencyCache::new(10);
        let interval = Duration::from_secs(5);

        assert!(cache.should_process_at("a.md", interval, at(0)));
        cache.touch_at("a.md", at(0));
        assert!(!cache.should_process_at("a.md", interval, at(1)));
        assert!(!cache.should_process_at("a.md", interval, at(4)));
        assert!(cache.should_process_at("a.md", interval, at(5)));
    }

    #[test]
    fn throttle_with_real_clock() {
        let cache = RecencyCache::new(10);
        assert!(cache.should_process("a.md", Duration::from_millis(20)));
        cache.touch("a.md");
        assert!(!cache.should_process("a.md", Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.should_process("a.md", Duration::from_millis(20)));
    }

    #[test]
    fn backwards_clock_counts_as_unseen() {
        let cache = RecencyCache::new(10);
        cache.touch_at("a.md", at(100));
        assert!(cache.should_process_at("a.md", Duration::from_secs(60), at(50)));
    }

    #[test]
    fn touch_creates_then_increments() {
        let cache = RecencyCache::new(10);
        cache.touch_at("a.md", at(0));
        cache.touch_at("a.md", at(3));
        let record = cache.get("a.md").unwrap();
        assert_eq!(record.access_count, 2);
        assert_eq!(record.first_seen, at(0));
        assert_eq!(record.last_seen, at(3));
    }

    #[test]
    fn full_cache_evicts_least_recently_seen() {
        let cache = RecencyCache::new(2);
        cache.touch_at("a.md", at(0));
        cache.touch_at("b.md", at(1));
        cache.touch_at("a.md", at(2));
        cache.touch_at("c.md", at(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b.md").is_none());
        assert!(cache.get("a.md").is_some());
        assert!(cache.get("c.md").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn shrinking_capacity_evicts_immediately() {
        let cache = RecencyCache::new(5);
        for i in 0..5 {
            cache.touch_at(&format!("{i}.md"), at(i));
        }
        cache.set_capacity(2);
        assert_eq!(cache.len(), 2);
        let paths: Vec<String> = cache.records().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["4.md".to_string(), "3.md".to_string()]);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = RecencyCache::new(4);
        assert!(cache.get("a.md").is_none());
        cache.touch_at("a.md", at(0));
        assert!(cache.get("a.md").is_some());
        let _ = cache.should_process_at("a.md", Duration::from_secs(1), at(0));
        let _ = cache.should_process_at("b.md", Duration::from_secs(1), at(0));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cleanup_removes_only_stale_records() {
        let cache = RecencyCache::new(10).with_stale_after(Duration::from_secs(60));
        cache.touch_at("old.md", at(0));
        cache.touch_at("new.md", at(100));

        let removed = cache.cleanup_stale(at(120));
        assert_eq!(removed, 1);
        assert!(cache.get("old.md").is_none());
        assert!(cache.get("new.md").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_cleanup_sweeps_until_stopped() {
        let cache = RecencyCache::new(10).with_stale_after(Duration::from_secs(0));
        cache.touch_at("a.md", Utc::now() - ChronoDuration::seconds(10));
        cache.start_periodic_cleanup(Duration::from_secs(60));

        assert_eq!(cache.len(), 1);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.len(), 0);

        cache.stop();
        cache.touch_at("b.md", Utc::now() - ChronoDuration::seconds(10));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cleanup_interval_still_sweeps() {
        let cache = RecencyCache::new(10).with_stale_after(Duration::from_secs(0));
        cache.touch_at("a.md", Utc::now() - ChronoDuration::seconds(10));
        cache.start_periodic_cleanup(Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.len(), 0);
        cache.stop();
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn size_is_bounded_and_eviction_is_lru(
                capacity in 1usize..8,
                touches in proptest::collection::vec(0u8..16, 1..64),
            ) {
                let cache = RecencyCache::new(capacity);
                for (tick, key) in touches.iter().enumerate() {
                    let path = format!("{key}.md");
                    let before = cache.records();
                    let is_new = !before.iter().any(|r| r.path == path);

                    cache.touch_at(&path, at(tick as i64));
                    prop_assert!(cache.len() <= capacity);

                    if is_new && before.len() == capacity {
                        let oldest = before.iter().min_by_key(|r| r.last_seen).unwrap();
                        prop_assert!(cache.records().iter().all(|r| r.path != oldest.path));
                    }
                }
            }
        }
    }
}
