//! Dependency Tracing
//!
//! When a computation is assigned to an entry, the table evaluates it once
//! inside a trace scope. Every entry read during that evaluation, directly
//! or through other computed entries, is appended to the scope's path. The
//! path serves two purposes:
//!
//! 1. Cycle detection: if the entry being assigned shows up in its own path,
//!    the computation reads itself and is rejected.
//! 2. Edge discovery: the deduplicated path becomes the entry's `relies_on`
//!    set once the assignment succeeds. The direct reads are kept apart
//!    and become the entry's `reads`, which later traces walk to find the
//!    upstream closure.
//!
//! A read made directly by the computation being assigned also refreshes
//! the read entry, so the trace sees current values and catches entries
//! that only started reading the target after their own last trace. Reads
//! made by that refresh are recorded but not refreshed again, which keeps
//! the stack flat however long the chain behind them is.

mod scope;

use std::sync::atomic::{AtomicU64, Ordering};

pub use scope::{EvalGuard, Recorded, Trace, TracePath, TraceScope, TraceViolation};

/// Identity of a table, used to keep one table's reads out of another
/// table's trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(u64);

impl TableId {
    /// Generate a new unique table ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TableId {
    fn default() -> Self {
        Self::new()
    }
}
