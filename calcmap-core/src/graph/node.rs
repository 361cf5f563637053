//! Graph Nodes
//!
//! This module defines the entries that live in the node arena.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::Result;
use crate::table::ChangeCallback;

/// Unique identifier for a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-argument computation producing an entry's value.
///
/// Compute functions read other entries through the table, which is how the
/// tracer learns what they depend on.
pub type ComputeFn<V> = Arc<dyn Fn() -> Result<V> + Send + Sync>;

/// How a node gets its value.
pub enum NodeKind<V> {
    /// A value written by the caller.
    Literal,

    /// A value derived by `compute`. `dirty` means the cached value may be
    /// stale because something it relies on changed.
    Computed { compute: ComputeFn<V>, dirty: bool },
}

impl<V> Clone for NodeKind<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Literal => Self::Literal,
            Self::Computed { compute, dirty } => Self::Computed {
                compute: Arc::clone(compute),
                dirty: *dirty,
            },
        }
    }
}

impl<V> fmt::Debug for NodeKind<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal => f.write_str("Literal"),
            Self::Computed { dirty, .. } => f.debug_struct("Computed").field("dirty", dirty).finish(),
        }
    }
}

/// A single named entry: key, cached value, optional computation and edges.
pub struct Node<K, V> {
    /// Unique identifier for this node.
    id: NodeId,

    /// Immutable identity of the entry.
    key: K,

    /// Cached value. `None` only while a new computed entry runs its first
    /// trace.
    value: Option<V>,

    /// Literal or computed.
    kind: NodeKind<V>,

    /// Nodes this node's computation read during its last trace, upstream
    /// closures included.
    relies_on: IndexSet<NodeId>,

    /// The subset of `relies_on` the computation read itself.
    reads: IndexSet<NodeId>,

    /// Nodes whose computation read this node.
    dependents: IndexSet<NodeId>,

    /// Fired with (key, old, new) when the cached value changes.
    on_change: Option<ChangeCallback<K, V>>,
}

impl<K, V: PartialEq> Node<K, V> {
    /// Create a literal node holding `value`.
    pub fn literal(key: K, value: V) -> Self {
        Self::with_value(key, Some(value))
    }

    /// Create a node with no value yet, about to receive a computation.
    pub fn vacant(key: K) -> Self {
        Self::with_value(key, None)
    }

    fn with_value(key: K, value: Option<V>) -> Self {
        Self {
            id: NodeId::new(),
            key,
            value,
            kind: NodeKind::Literal,
            relies_on: IndexSet::new(),
            reads: IndexSet::new(),
            dependents: IndexSet::new(),
            on_change: None,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// The cached value, without recomputing.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.kind, NodeKind::Computed { .. })
    }

    /// Whether the cached value may be stale. Always false for literals.
    pub fn is_dirty(&self) -> bool {
        matches!(self.kind, NodeKind::Computed { dirty: true, .. })
    }

    /// Mark the node as needing recomputation. Literals ignore this.
    pub fn mark_dirty(&mut self) {
        if let NodeKind::Computed { dirty, .. } = &mut self.kind {
            *dirty = true;
        }
    }

    pub fn mark_clean(&mut self) {
        if let NodeKind::Computed { dirty, .. } = &mut self.kind {
            *dirty = false;
        }
    }

    /// The computation to run if the cached value is stale.
    pub fn pending_compute(&self) -> Option<ComputeFn<V>> {
        match &self.kind {
            NodeKind::Computed { compute, dirty: true } => Some(Arc::clone(compute)),
            _ => None,
        }
    }

    /// The computation, stale or not.
    pub fn compute_fn(&self) -> Option<ComputeFn<V>> {
        match &self.kind {
            NodeKind::Computed { compute, .. } => Some(Arc::clone(compute)),
            NodeKind::Literal => None,
        }
    }

    /// Install a computation whose result is already cached.
    pub fn set_compute(&mut self, compute: ComputeFn<V>) {
        self.kind = NodeKind::Computed {
            compute,
            dirty: false,
        };
    }

    /// Turn the node back into a literal. Edges are the arena's business.
    pub fn clear_compute(&mut self) {
        self.kind = NodeKind::Literal;
    }

    /// Whether storing `value` would change the cached value.
    pub fn differs_from(&self, value: &V) -> bool {
        self.value.as_ref() != Some(value)
    }

    /// Store a value, returning the previous one.
    pub fn replace_value(&mut self, value: V) -> Option<V> {
        self.value.replace(value)
    }

    /// Add a dependency (a node that this node reads from).
    pub fn add_dependency(&mut self, node_id: NodeId) {
        self.relies_on.insert(node_id);
    }

    /// Remove a dependency.
    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.relies_on.shift_remove(&node_id);
        self.reads.shift_remove(&node_id);
    }

    /// Get all dependencies, in the order they were first read.
    pub fn relies_on(&self) -> &IndexSet<NodeId> {
        &self.relies_on
    }

    /// Direct reads, in the order they happened.
    pub fn reads(&self) -> &IndexSet<NodeId> {
        &self.reads
    }

    pub fn set_reads(&mut self, reads: IndexSet<NodeId>) {
        self.reads = reads;
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Take the dependency set, leaving it and the direct reads empty.
    pub fn take_dependencies(&mut self) -> IndexSet<NodeId> {
        self.reads.clear();
        std::mem::take(&mut self.relies_on)
    }

    pub fn on_change(&self) -> Option<&ChangeCallback<K, V>> {
        self.on_change.as_ref()
    }

    pub fn set_on_change(&mut self, callback: Option<ChangeCallback<K, V>>) {
        self.on_change = callback;
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Node<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("value", &self.value)
            .field("kind", &self.kind)
            .field("relies_on", &self.relies_on)
            .field("reads", &self.reads)
            .field("dependents", &self.dependents)
            .finish()
    }
}
