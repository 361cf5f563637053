//! Node Arena
//!
//! The arena owns every node of a table and is the only place that edits
//! edges, so `relies_on` and `dependents` always change together.
//!
//! # Invalidation
//!
//! Invalidation is transitive but lazy. When a value changes, everything
//! downstream of it is marked dirty and nothing is recomputed. A dirty node
//! recomputes on its next read, after the stale nodes upstream of it have
//! been refreshed in dependency order (see [`NodeArena::stale_upstream`]).
//!
//! Everything downstream of a dirty node is dirty too. Recomputing clears a
//! single node, so this holds as long as only invalidation sets the flag,
//! and it lets invalidation stop at nodes that are already dirty.
//!
//! # Edges
//!
//! `relies_on` holds a node's whole upstream closure as of its last trace,
//! with `dependents` as its mirror. Walks upstream follow the shorter
//! `reads` lists instead, which also pick up later reassignments upstream.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::{Node, NodeId};

/// Id-indexed storage for the nodes of one table.
pub struct NodeArena<K, V> {
    /// All nodes, indexed by ID.
    nodes: HashMap<NodeId, Node<K, V>>,
}

impl<K, V: PartialEq> NodeArena<K, V> {
    /// Create a new empty arena.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the arena.
    pub fn add_node(&mut self, node: Node<K, V>) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the arena.
    ///
    /// Also removes all edges involving this node. Former dependents are
    /// marked dirty: the value they were computed from is gone.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node<K, V>> {
        let node = self.nodes.remove(&node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.relies_on() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }
        self.invalidate(node.dependents().iter().copied());

        Some(node)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node<K, V>> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node<K, V>> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Add a dependency edge: `dependent` relies on `dependency`.
    ///
    /// This means when `dependency` changes, `dependent` goes dirty.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Sever every `relies_on` edge of a node. Its dependents are kept.
    pub fn clear_dependencies(&mut self, node_id: NodeId) {
        let old = match self.nodes.get_mut(&node_id) {
            Some(node) => node.take_dependencies(),
            None => return,
        };
        for dep_id in old {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(node_id);
            }
        }
    }

    /// Replace a node's dependencies with `dependencies` and its direct
    /// reads with `reads`, wiring both sides.
    ///
    /// The node itself and ids that are no longer in the arena are skipped.
    pub fn rewire(
        &mut self,
        node_id: NodeId,
        dependencies: impl IntoIterator<Item = NodeId>,
        reads: impl IntoIterator<Item = NodeId>,
    ) {
        self.clear_dependencies(node_id);
        let fresh: IndexSet<NodeId> = dependencies
            .into_iter()
            .filter(|dep| *dep != node_id && self.nodes.contains_key(dep))
            .collect();
        let reads: IndexSet<NodeId> = reads.into_iter().filter(|id| fresh.contains(id)).collect();
        for dep in fresh {
            self.add_edge(dep, node_id);
        }
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_reads(reads);
        }
    }

    /// Mark everything downstream of a node dirty.
    ///
    /// Returns the number of nodes touched.
    pub fn mark_dependents_dirty(&mut self, node_id: NodeId) -> usize {
        let roots: SmallVec<[NodeId; 8]> = match self.nodes.get(&node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return 0,
        };
        self.invalidate(roots)
    }

    /// Mark `roots` and all of their dependents dirty.
    ///
    /// Returns how many nodes went from clean to dirty. Dirty nodes are not
    /// walked again, their dependents are dirty already.
    fn invalidate(&mut self, roots: impl IntoIterator<Item = NodeId>) -> usize {
        let mut marked = 0;
        let mut pending: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if !node.is_computed() || node.is_dirty() {
                continue;
            }
            node.mark_dirty();
            marked += 1;
            pending.extend(node.dependents().iter().copied());
        }
        marked
    }

    /// Dirty nodes upstream of `node_id`, dependencies before dependents.
    ///
    /// Refreshing them in this order means no recompute has to reach
    /// further upstream on its own. `node_id` itself is not included.
    pub fn stale_upstream(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(node_id);

        // (node, expanded): a node is emitted after its dependencies
        let mut stack: SmallVec<[(NodeId, bool); 32]> = SmallVec::new();
        if let Some(node) = self.nodes.get(&node_id) {
            stack.extend(node.reads().iter().rev().map(|id| (*id, false)));
        }
        while let Some((id, expanded)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if expanded {
                if node.is_dirty() {
                    order.push(id);
                }
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.push((id, true));
            stack.extend(
                node.reads()
                    .iter()
                    .rev()
                    .filter(|dep| !seen.contains(*dep))
                    .map(|dep| (*dep, false)),
            );
        }
        order
    }

    /// Direct reads of a node, in read order.
    pub fn upstream_of(&self, node_id: NodeId) -> SmallVec<[NodeId; 8]> {
        self.nodes
            .get(&node_id)
            .map(|node| node.reads().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Resolve ids to keys, skipping ids that are gone.
    pub fn keys_of<'a, 'i>(&'a self, ids: impl IntoIterator<Item = &'i NodeId>) -> Vec<&'a K> {
        ids.into_iter()
            .filter_map(|id| self.nodes.get(id).map(Node::key))
            .collect()
    }

    /// Get the total number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl<K, V: PartialEq> Default for NodeArena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
