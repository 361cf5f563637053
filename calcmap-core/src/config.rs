//! Table Configuration
//!
//! A [`TableConfig`] fixes the initial bucket count, the trace depth cap and
//! what happens when a literal is written over a computed entry. It can be
//! built in code or deserialized from JSON; missing fields take defaults.
//!
//! ```json
//! { "bucket_count": 32, "max_depth": 200, "assignment_policy": "overwrite" }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Bucket count used when none is configured.
pub const DEFAULT_BUCKETS: usize = 8;

/// Longest trace path and deepest recomputation chain allowed by default.
pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// What a literal write does when it targets a computed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicy {
    /// Reject the write with `AssignmentToComputedEntry`.
    #[default]
    Throw,

    /// Drop the write silently.
    Ignore,

    /// Discard the computation and store the literal.
    Overwrite,
}

/// Construction-time settings for a [`ComputeTable`](crate::table::ComputeTable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Number of hash buckets. Zero selects [`DEFAULT_BUCKETS`].
    pub bucket_count: usize,

    /// Cap on trace path length and nested recomputation depth.
    pub max_depth: usize,

    /// Behavior of literal writes over computed entries.
    pub assignment_policy: AssignmentPolicy,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            bucket_count: DEFAULT_BUCKETS,
            max_depth: DEFAULT_MAX_DEPTH,
            assignment_policy: AssignmentPolicy::default(),
        }
    }
}

impl TableConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| StoreError::InvalidConfig {
            cause: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings for values the table cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(StoreError::InvalidConfig {
                cause: "max_depth must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn with_bucket_count(mut self, bucket_count: usize) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_assignment_policy(mut self, policy: AssignmentPolicy) -> Self {
        self.assignment_policy = policy;
        self
    }

    /// The bucket count with the zero-means-default rule applied.
    pub(crate) fn effective_bucket_count(&self) -> usize {
        effective_bucket_count(self.bucket_count)
    }
}

pub(crate) fn effective_bucket_count(requested: usize) -> usize {
    if requested == 0 {
        DEFAULT_BUCKETS
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TableConfig::default();
        assert_eq!(config.bucket_count, 8);
        assert_eq!(config.max_depth, 1000);
        assert_eq!(config.assignment_policy, AssignmentPolicy::Throw);
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = TableConfig::from_json(r#"{ "assignment_policy": "overwrite" }"#).unwrap();
        assert_eq!(config.assignment_policy, AssignmentPolicy::Overwrite);
        assert_eq!(config.bucket_count, DEFAULT_BUCKETS);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn json_rejects_zero_depth() {
        let err = TableConfig::from_json(r#"{ "max_depth": 0 }"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig { .. }));
    }

    #[test]
    fn json_rejects_unknown_policy() {
        let err = TableConfig::from_json(r#"{ "assignment_policy": "explode" }"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig { .. }));
    }

    #[test]
    fn zero_buckets_means_default() {
        let config = TableConfig::default().with_bucket_count(0);
        assert_eq!(config.effective_bucket_count(), DEFAULT_BUCKETS);
        assert_eq!(effective_bucket_count(3), 3);
    }
}
