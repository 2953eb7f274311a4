//! Tracker configuration.
//!
//! Read from `<vault>/.tally/config.yaml` when present:
//! ```yaml
//! counter_field_name: view_count
//! include_paths: ["notes/*"]
//! exclude_paths: ["notes/private/*"]
//! min_interval_ms: 5000
//! max_batch_size: 10
//! flush_interval_ms: 5000
//! cache_capacity: 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Directory under the vault root that holds tally's own files.
pub const CONFIG_DIR: &str = ".tally";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.yaml";

/// Include/exclude glob rules consumed by the path filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Settings applied atomically to the whole tracking pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Frontmatter key the counter is stored under.
    pub counter_field_name: String,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    /// Minimum time between two counted accesses of the same path.
    pub min_interval_ms: u64,
    pub max_batch_size: usize,
    pub flush_interval_ms: u64,
    pub cache_capacity: usize,
    /// Delay between reaching `max_batch_size` and the resulting flush.
    pub debounce_ms: u64,
    /// Recency records idle longer than this are swept.
    pub stale_after_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            counter_field_name: "view_count".to_string(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            min_interval_ms: 5_000,
            max_batch_size: 10,
            flush_interval_ms: 5_000,
            cache_capacity: 1_000,
            debounce_ms: 500,
            stale_after_ms: 30 * 60 * 1_000,
            cleanup_interval_ms: 5 * 60 * 1_000,
        }
    }
}

impl TrackerConfig {
    /// Path of the config file for a vault.
    #[must_use]
    pub fn path_in(vault_root: &Path) -> PathBuf {
        vault_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load the vault's config file, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Config`] if the file exists but is not valid,
    /// and [`TallyError::Io`] if it cannot be read.
    pub fn load(vault_root: &Path) -> Result<Self> {
        let path = Self::path_in(vault_root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML config document.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Config`] on malformed YAML or invalid values.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| TallyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`TallyError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.counter_field_name.trim().is_empty() {
            return Err(TallyError::Config(
                "counter_field_name must not be empty".to_string(),
            ));
        }
        let name = &self.counter_field_name;
        if name.contains([':', '\n'])
            || name.trim() != name.as_str()
            || name.starts_with(['#', '-'])
        {
            return Err(TallyError::Config(format!(
                "counter_field_name '{}' is not a valid header key",
                self.counter_field_name
            )));
        }
        if self.max_batch_size == 0 {
            return Err(TallyError::Config("max_batch_size must be at least 1".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(TallyError::Config("cache_capacity must be at least 1".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(TallyError::Config("flush_interval_ms must be positive".to_string()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(TallyError::Config("cleanup_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn filter_rules(&self) -> FilterRules {
        FilterRules {
            include_patterns: self.include_paths.clone(),
            exclude_patterns: self.exclude_paths.clone(),
        }
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}
