//! Queued counter updates and flush results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::DocumentRef;

/// Retry cap for a failed [`UpdateOperation`]. An operation that fails with
/// `retry_count == MAX_RETRIES` is dropped.
pub const MAX_RETRIES: u32 = 3;

/// Priority class of a queued operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// A pending change to a counter field in one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOperation {
    pub document: DocumentRef,
    pub field_key: String,
    pub delta: i64,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub priority: Priority,
}

impl UpdateOperation {
    /// A normal-priority `+1` on `field_key`.
    pub fn increment(document: DocumentRef, field_key: impl Into<String>) -> Self {
        Self {
            document,
            field_key: field_key.into(),
            delta: 1,
            enqueued_at: Utc::now(),
            retry_count: 0,
            priority: Priority::Normal,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_delta(mut self, delta: i64) -> Self {
        self.delta = delta;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.document.path
    }

    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.retry_count < MAX_RETRIES
    }
}

/// One failed application of an operation during a flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedOperation {
    pub operation: UpdateOperation,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub processing_time_ms: u64,
    pub failures: Vec<FailedOperation>,
}

impl ProcessResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processed_count == 0
    }

    /// Fold another flush result into this one.
    pub fn absorb(&mut self, other: ProcessResult) {
        self.processed_count += other.processed_count;
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.processing_time_ms += other.processing_time_ms;
        self.failures.extend(other.failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_defaults() {
        let op = UpdateOperation::increment(DocumentRef::new("a.md"), "view_count");
        assert_eq!(op.delta, 1);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.priority, Priority::Normal);
        assert_eq!(op.path(), "a.md");
        assert!(op.can_retry());
    }

    #[test]
    fn retry_cap_is_exclusive() {
        let mut op = UpdateOperation::increment(DocumentRef::new("a.md"), "view_count");
        op.retry_count = MAX_RETRIES;
        assert!(!op.can_retry());
    }

    #[test]
    fn absorb_sums_counts() {
        let mut total = ProcessResult::empty();
        total.absorb(ProcessResult {
            processed_count: 2,
            success_count: 1,
            failure_count: 1,
            processing_time_ms: 3,
            failures: Vec::new(),
        });
        assert_eq!(total.processed_count, 2);
        assert_eq!(total.failure_count, 1);
        assert!(!total.is_empty());
    }
}
