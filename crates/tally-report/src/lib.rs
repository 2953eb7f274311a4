//! # tally-report
//!
//! Read-only statistics over tracked documents: totals, most and least
//! accessed, and activity in trailing time windows. Rendered as JSON, an
//! aligned text table, or CSV.

pub mod formatter;
pub mod summary;

pub use formatter::{format_summary, OutputFormat};
pub use summary::{AccessSummary, DocumentStat, TrendWindow, TREND_WINDOWS};
