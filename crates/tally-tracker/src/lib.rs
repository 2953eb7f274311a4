//! # tally-tracker
//!
//! The in-memory half of the access pipeline:
//! - [`PathFilter`]: include/exclude glob rules
//! - [`RecencyCache`]: bounded LRU record per path, used as the throttle gate
//! - [`BatchQueue`]: priority queue with debounced and periodic flushing
//! - [`OperationSink`]: where flushed operations are applied
//! - [`AccessTracker`]: wires the above to a [`tally_vault::FrontmatterStore`]

pub mod cache;
pub mod filter;
pub mod pipeline;
pub mod queue;
pub mod sink;

pub use cache::{CacheStats, RecencyCache};
pub use filter::{glob_to_regex, normalize_path, PathFilter};
pub use pipeline::{AccessOutcome, AccessTracker};
pub use queue::{BatchQueue, FlushCallback, QueueStatus, Subscription};
pub use sink::OperationSink;
