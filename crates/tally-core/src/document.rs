//! Document and access record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reference to a document in the vault, as handed over by whatever
/// detected the access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Vault-relative path using `/` separators (e.g., `notes/alpha.md`).
    pub path: String,
    #[serde(default)]
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DocumentRef {
    /// A reference carrying only a path; timestamps are set to now.
    pub fn new(path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            size_bytes: 0,
            modified_at: now,
            created_at: now,
        }
    }
}

/// Recency information for one tracked path.
///
/// `access_count` is at least 1 for every record that exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub path: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub access_count: u64,
}

impl AccessRecord {
    #[must_use]
    pub fn new(path: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            first_seen: now,
            last_seen: now,
            access_count: 1,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
        self.access_count += 1;
    }
}

/// A document's stored counter value, as found by a vault scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCount {
    pub path: String,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}
