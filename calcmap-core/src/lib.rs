//! Calcmap Core
//!
//! This crate provides a key-value table whose entries can be literal values
//! or computations over other entries, in the manner of spreadsheet cells.
//! It implements:
//!
//! - Automatic dependency discovery by tracing what a computation reads
//! - Rejection of self-referencing computations at assignment time
//! - Lazy, memoized recomputation of stale entries
//! - Change notification per entry and per table
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `table`: The [`ComputeTable`] itself, its buckets and notification
//! - `graph`: Nodes and the dependency edges between them
//! - `trace`: Thread-local trace scopes used while assigning computations
//! - `config`: Construction-time settings
//! - `error`: The [`StoreError`] type
//!
//! # Example
//!
//! ```rust,ignore
//! use calcmap_core::{ComputeTable, StoreError};
//!
//! let table = ComputeTable::new();
//! table.set("price", 12)?;
//! table.set("quantity", 3)?;
//!
//! let cells = table.downgrade();
//! table.set_computed("total", move || {
//!     Ok(cells.get(&"price")? * cells.get(&"quantity")?)
//! })?;
//! assert_eq!(table.get(&"total")?, 36);
//!
//! // Only "total" recomputes, and only when read
//! table.set("quantity", 4)?;
//! assert_eq!(table.get(&"total")?, 48);
//!
//! // A computation may not read itself
//! let err = table.set_computed("price", move || cells.get(&"total")).unwrap_err();
//! assert!(matches!(err, StoreError::RecursionDetected { .. }));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod table;
pub mod trace;

pub use config::{AssignmentPolicy, TableConfig};
pub use error::{Result, StoreError};
pub use table::{ComputeTable, NodeInfo, SubscriberId, TableRef};
