//! Dependency Graph
//!
//! This module holds the nodes of a table and the edges between them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are table entries, either literal or computed
//! - Edges are dependencies: if A's computation read B, A relies on B and
//!   B has A as a dependent
//!
//! When a value changes, its dependents are marked dirty and recompute on
//! their next read.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena indexed by [`NodeId`]. Edges are id sets, not
//!    references, so removing a node is a local operation on its neighbors.
//!
//! 2. Both forward (`relies_on`) and reverse (`dependents`) edges are kept,
//!    and only the arena edits them, so they stay mutual inverses.
//!
//! 3. Acyclicity is checked when a computation is assigned (see
//!    [`crate::trace`]), never on read.

mod arena;
mod node;

pub use arena::NodeArena;
pub use node::{ComputeFn, Node, NodeId, NodeKind};
