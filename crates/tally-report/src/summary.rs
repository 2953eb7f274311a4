//! Aggregate access statistics.

use std::cmp::Reverse;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{AccessRecord, DocumentCount};

/// Trend windows reported by default, newest first.
pub const TREND_WINDOWS: [(&str, i64); 4] = [("1h", 1), ("24h", 24), ("7d", 24 * 7), ("30d", 24 * 30)];

/// One document's line in a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStat {
    pub path: String,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Activity inside one trailing time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendWindow {
    pub window: String,
    /// Documents with activity inside the window.
    pub documents: usize,
    /// Sum of their counts.
    pub accesses: i64,
}

/// Read-only statistics over a set of documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSummary {
    pub generated_at: DateTime<Utc>,
    pub total_files: usize,
    pub total_accesses: i64,
    pub most_accessed: Vec<DocumentStat>,
    pub least_accessed: Vec<DocumentStat>,
    pub trends: Vec<TrendWindow>,
}

impl AccessSummary {
    /// Summarise stored counters, using each file's modification time as its
    /// last activity.
    #[must_use]
    pub fn from_counts(counts: &[DocumentCount], now: DateTime<Utc>, top_n: usize) -> Self {
        let stats = counts
            .iter()
            .map(|c| DocumentStat {
                path: c.path.clone(),
                count: c.count,
                last_activity: c.modified_at,
            })
            .collect();
        Self::from_stats(stats, now, top_n)
    }

    /// Summarise the in-memory recency records of a running tracker.
    #[must_use]
    pub fn from_records(records: &[AccessRecord], now: DateTime<Utc>, top_n: usize) -> Self {
        let stats = records
            .iter()
            .map(|r| DocumentStat {
                path: r.path.clone(),
                count: i64::try_from(r.access_count).unwrap_or(i64::MAX),
                last_activity: Some(r.last_seen),
            })
            .collect();
        Self::from_stats(stats, now, top_n)
    }

    fn from_stats(mut stats: Vec<DocumentStat>, now: DateTime<Utc>, top_n: usize) -> Self {
        let total_files = stats.len();
        let total_accesses = stats.iter().map(|s| s.count).sum();

        let trends = TREND_WINDOWS
            .iter()
            .map(|(label, hours)| {
                let since = now - Duration::hours(*hours);
                let active: Vec<&DocumentStat> = stats
                    .iter()
                    .filter(|s| s.last_activity.is_some_and(|t| t >= since && t <= now))
                    .collect();
                TrendWindow {
                    window: (*label).to_string(),
                    documents: active.len(),
                    accesses: active.iter().map(|s| s.count).sum(),
                }
            })
            .collect();

        // Ties break on path so output is stable.
        stats.sort_by(|a, b| a.count.cmp(&b.count).then_with(|| a.path.cmp(&b.path)));
        let least_accessed = stats.iter().take(top_n).cloned().collect();
        stats.sort_by_key(|s| (Reverse(s.count), s.path.clone()));
        let most_accessed = stats.into_iter().take(top_n).collect();

        Self {
            generated_at: now,
            total_files,
            total_accesses,
            most_accessed,
            least_accessed,
            trends,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(path: &str, count: i64, modified_at: Option<DateTime<Utc>>) -> DocumentCount {
        DocumentCount {
            path: path.to_string(),
            count,
            modified_at,
        }
    }

    #[test]
    fn totals_and_rankings() {
        let now = Utc::now();
        let counts = vec![
            count("a.md", 3, None),
            count("b.md", 10, None),
            count("c.md", 1, None),
            count("d.md", 3, None),
        ];
        let summary = AccessSummary::from_counts(&counts, now, 2);

        assert_eq!(summary.total_files, 4);
        assert_eq!(summary.total_accesses, 17);
        let most: Vec<&str> = summary.most_accessed.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(most, vec!["b.md", "a.md"]);
        let least: Vec<&str> = summary.least_accessed.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(least, vec!["c.md", "a.md"]);
    }

    #[test]
    fn trend_windows_count_recent_activity() {
        let now = Utc::now();
        let counts = vec![
            count("fresh.md", 2, Some(now - Duration::minutes(10))),
            count("today.md", 5, Some(now - Duration::hours(3))),
            count("old.md", 7, Some(now - Duration::days(60))),
            count("unknown.md", 1, None),
        ];
        let summary = AccessSummary::from_counts(&counts, now, 10);

        let by_label = |label: &str| summary.trends.iter().find(|t| t.window == label).unwrap().clone();
        assert_eq!(by_label("1h").documents, 1);
        assert_eq!(by_label("1h").accesses, 2);
        assert_eq!(by_label("24h").documents, 2);
        assert_eq!(by_label("24h").accesses, 7);
        assert_eq!(by_label("30d").documents, 2);
    }

    #[test]
    fn records_use_last_seen() {
        let now = Utc::now();
        let mut record = AccessRecord::new("a.md", now - Duration::hours(2));
        record.touch(now - Duration::minutes(5));
        let summary = AccessSummary::from_records(&[record], now, 5);

        assert_eq!(summary.total_accesses, 2);
        assert_eq!(summary.trends[0].documents, 1);
        assert_eq!(summary.most_accessed[0].last_activity, Some(now - Duration::minutes(5)));
    }

    #[test]
    fn empty_input() {
        let summary = AccessSummary::from_counts(&[], Utc::now(), 5);
        assert_eq!(summary.total_files, 0);
        assert_eq!(summary.total_accesses, 0);
        assert!(summary.most_accessed.is_empty());
        assert!(summary.trends.iter().all(|t| t.documents == 0));
    }
}
