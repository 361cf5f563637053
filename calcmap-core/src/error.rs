//! Error types for calcmap.
//!
//! Keys and values are rendered with `Debug` when an error is built, so the
//! error type stays free of the table's type parameters and can cross the
//! boundary of a compute function unchanged.

use thiserror::Error;

/// Errors produced by a [`ComputeTable`](crate::table::ComputeTable).
///
/// None of these are fatal. They are deterministic for a given graph state,
/// so the table never retries on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A lookup with `get` hit a key that is not in the table.
    #[error("table does not contain key {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// A computation read the entry it was being assigned to.
    #[error("recursion detected while computing {key}: {path}")]
    RecursionDetected {
        /// The entry whose computation was rejected.
        key: String,
        /// The trace path as `a -> b -> a ~> value`.
        path: String,
    },

    /// A computation read more entries than the configured maximum depth.
    #[error("max compute depth {max_depth} reached while computing {key}: {path}")]
    MaxDepthExceeded {
        /// The entry whose computation was rejected.
        key: String,
        /// The configured cap.
        max_depth: usize,
        /// The trace path as `a -> b -> c ~> value`.
        path: String,
    },

    /// A literal write targeted a computed entry under the `Throw` policy.
    #[error("can't set {key}, this value is computed (relies on: {relies_on})")]
    AssignmentToComputedEntry {
        /// The computed entry.
        key: String,
        /// Comma separated keys the entry relies on.
        relies_on: String,
    },

    /// A `TableRef` was read after every strong handle was dropped.
    #[error("table was dropped")]
    TableDropped,

    /// A configuration could not be parsed or failed validation.
    #[error("invalid table configuration: {cause}")]
    InvalidConfig {
        /// Reason for the failure.
        cause: String,
    },
}

impl StoreError {
    pub(crate) fn key_not_found<K: std::fmt::Debug>(key: &K) -> Self {
        Self::KeyNotFound {
            key: format!("{key:?}"),
        }
    }

    /// Whether this error came from cycle or depth detection.
    pub fn is_trace_violation(&self) -> bool {
        matches!(
            self,
            Self::RecursionDetected { .. } | Self::MaxDepthExceeded { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
