//! Compute Table
//!
//! [`ComputeTable`] is an associative container whose entries are either
//! literal values or values derived by a computation over other entries.
//!
//! # How It Works
//!
//! 1. `set` stores a literal. If the value changed, everything downstream
//!    of it is marked dirty. Nothing recomputes yet.
//!
//! 2. `set_computed` runs the computation once inside a trace scope. Every
//!    entry it reads becomes a dependency. If it reads the entry being
//!    assigned, or reads more entries than `max_depth`, the assignment is
//!    rejected and the entry keeps its previous state.
//!
//! 3. `get` returns the cached value. A dirty computed entry first refreshes
//!    the dirty entries upstream of it, dependencies first, then re-runs its
//!    own computation. Whenever a result differs, change callbacks fire.
//!    Refreshing bottom-up keeps the stack flat for long chains.
//!
//! # Storage
//!
//! Entries live in a [`NodeArena`]. Keys are located through hash buckets
//! sorted by `(hash, key)`, and a separate insertion-order set drives
//! enumeration, so the order of keys never depends on the hash layout.
//!
//! # Thread Safety
//!
//! State sits behind one `RwLock`. Clean reads take the read lock, anything
//! that touches cached values or dirty flags takes the write lock, and no
//! lock is held while a computation or a callback runs. That lets
//! computations read the table they belong to. Writers are expected to
//! follow a single-writer discipline; concurrent writes are memory safe but
//! not transactional.
//!
//! Hash functions run under the lock and must not touch the table.

mod buckets;
mod iter;
mod notify;

use std::collections::hash_map::DefaultHasher;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::config::{effective_bucket_count, AssignmentPolicy, TableConfig};
use crate::error::{Result, StoreError};
use crate::graph::{ComputeFn, Node, NodeArena, NodeId};
use crate::trace::{EvalGuard, Recorded, TableId, Trace, TraceScope, TraceViolation};

use buckets::{Buckets, Probe, Slot};
use notify::{Notification, Subscribers};

pub use iter::Iter;
pub use notify::{ChangeCallback, SubscriberId};

/// Bounds on table keys.
pub trait TableKey: Ord + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> TableKey for T where T: Ord + Hash + Clone + Debug + Send + Sync + 'static {}

/// Bounds on table values. `PartialEq` suppresses no-op notifications.
pub trait TableValue: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> TableValue for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Hash function used to place keys in buckets.
pub type HashFn<K> = Arc<dyn Fn(&K) -> u64 + Send + Sync>;

/// Hash a key with the standard library's `Hash`, deterministically.
pub fn default_hash<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn join_keys<K: Debug>(keys: &[K]) -> String {
    keys.iter()
        .map(|key| format!("{key:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read-only view of one entry, for inspection and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo<K, V> {
    pub key: K,
    /// Cached value, not refreshed.
    pub value: Option<V>,
    pub computed: bool,
    pub dirty: bool,
    /// Keys read by the last trace, in first-read order.
    pub relies_on: Vec<K>,
    /// Keys whose computation read this entry.
    pub dependents: Vec<K>,
}

/// Everything guarded by the table lock.
struct TableState<K, V> {
    arena: NodeArena<K, V>,
    buckets: Buckets,
    /// Live nodes in first-insertion order.
    order: IndexSet<NodeId>,
    hasher: HashFn<K>,
    config: TableConfig,
}

impl<K: TableKey, V: TableValue> TableState<K, V> {
    fn new(config: TableConfig, hasher: HashFn<K>) -> Self {
        let buckets = Buckets::new(config.effective_bucket_count());
        Self {
            arena: NodeArena::new(),
            buckets,
            order: IndexSet::new(),
            hasher,
            config,
        }
    }

    fn probe(&self, hash: u64, key: &K) -> Probe {
        let arena = &self.arena;
        self.buckets
            .probe(hash, key, |id| arena.get_node(id).map(Node::key))
    }

    fn lookup(&self, key: &K) -> Option<NodeId> {
        match self.probe((self.hasher)(key), key) {
            Probe::Found { id, .. } => Some(id),
            Probe::Vacant { .. } => None,
        }
    }

    /// Find `key`, inserting the node built by `make` if it is absent.
    fn lookup_or_insert(&mut self, key: K, make: impl FnOnce(K) -> Node<K, V>) -> (NodeId, bool) {
        let hash = (self.hasher)(&key);
        match self.probe(hash, &key) {
            Probe::Found { id, .. } => (id, false),
            Probe::Vacant { bin, pos } => {
                let id = self.arena.add_node(make(key));
                self.buckets.insert(bin, pos, Slot { hash, id });
                self.order.insert(id);
                (id, true)
            }
        }
    }

    /// Unlink a node from the buckets, the insertion order and its
    /// neighbors.
    fn remove_key(&mut self, key: &K) -> Option<Node<K, V>> {
        match self.probe((self.hasher)(key), key) {
            Probe::Found { bin, pos, id } => {
                self.buckets.remove(bin, pos);
                self.order.shift_remove(&id);
                self.arena.remove_node(id)
            }
            Probe::Vacant { .. } => None,
        }
    }

    fn remove_id(&mut self, id: NodeId) -> Option<Node<K, V>> {
        let key = self.arena.get_node(id)?.key().clone();
        self.remove_key(&key)
    }

    /// Rebuild the buckets from the current hash function.
    fn rehash(&mut self, bucket_count: usize) {
        let Self {
            arena,
            buckets,
            order,
            hasher,
            ..
        } = self;
        let arena = &*arena;
        let hasher = &**hasher;
        let slots: Vec<Slot> = order
            .iter()
            .filter_map(|id| {
                arena.get_node(*id).map(|node| Slot {
                    hash: hasher(node.key()),
                    id: *id,
                })
            })
            .collect();
        buckets.rebuild(bucket_count, slots, |id| arena.get_node(id).map(Node::key));
    }

    /// Store a value. When it differs from the cached one, dependents go
    /// dirty and a notification is returned.
    fn store_value(&mut self, id: NodeId, value: V) -> Option<Notification<K, V>> {
        let node = self.arena.get_node_mut(id)?;
        if !node.differs_from(&value) {
            return None;
        }
        let old = node.replace_value(value.clone());
        let key = node.key().clone();
        let node_callback = node.on_change().cloned();
        let dependents = self.arena.mark_dependents_dirty(id);
        trace!(key = ?key, dependents, "value changed");

        Some(Notification {
            key,
            old,
            new: value,
            node_callback,
        })
    }

    /// Cache the result of a recomputation.
    fn commit_recompute(&mut self, id: NodeId, value: V) -> Option<Notification<K, V>> {
        let node = self.arena.get_node_mut(id)?;
        // Turned into a literal while the computation ran.
        if !node.is_computed() {
            return None;
        }
        node.mark_clean();
        self.store_value(id, value)
    }

    /// Install a traced computation with its first value.
    ///
    /// Fails with `KeyNotFound` if the entry was removed while the
    /// computation ran.
    fn commit_compute(
        &mut self,
        id: NodeId,
        key: &K,
        compute: ComputeFn<V>,
        trace: Trace,
        value: V,
    ) -> Result<Option<Notification<K, V>>> {
        if !self.arena.contains(id) {
            return Err(StoreError::key_not_found(key));
        }
        self.arena.rewire(id, trace.path, trace.reads);
        if let Some(node) = self.arena.get_node_mut(id) {
            node.set_compute(compute);
            debug!(key = ?node.key(), relies_on = node.relies_on().len(), "computation assigned");
        }
        Ok(self.store_value(id, value))
    }

    fn key_string(&self, id: NodeId) -> String {
        match self.arena.get_node(id) {
            Some(node) => format!("{:?}", node.key()),
            None => format!("#{}", id.raw()),
        }
    }

    fn key_list(&self, ids: &IndexSet<NodeId>) -> Vec<K> {
        self.arena.keys_of(ids).into_iter().cloned().collect()
    }

    /// Render `a -> b -> c ~> value`, where value is the cached value of
    /// the last node.
    fn render_path(&self, path: &[NodeId]) -> String {
        let chain = path
            .iter()
            .map(|id| self.key_string(*id))
            .collect::<Vec<_>>()
            .join(" -> ");
        let terminal = path
            .last()
            .and_then(|id| self.arena.get_node(*id))
            .and_then(Node::value);
        format!("{chain} ~> {terminal:?}")
    }

    fn violation_error(&self, violation: &TraceViolation) -> StoreError {
        match violation {
            TraceViolation::Recursion { path } => StoreError::RecursionDetected {
                key: path
                    .last()
                    .map(|id| self.key_string(*id))
                    .unwrap_or_default(),
                path: self.render_path(path),
            },
            TraceViolation::MaxDepth {
                target,
                max_depth,
                path,
            } => StoreError::MaxDepthExceeded {
                key: self.key_string(*target),
                max_depth: *max_depth,
                path: self.render_path(path),
            },
        }
    }

    fn depth_error(&self, max_depth: usize, chain: &[NodeId]) -> StoreError {
        StoreError::MaxDepthExceeded {
            key: chain
                .last()
                .map(|id| self.key_string(*id))
                .unwrap_or_default(),
            max_depth,
            path: self.render_path(chain),
        }
    }

    fn assignment_error(&self, id: NodeId) -> StoreError {
        let (key, relies_on) = match self.arena.get_node(id) {
            Some(node) => (
                format!("{:?}", node.key()),
                self.arena
                    .keys_of(node.relies_on())
                    .iter()
                    .map(|key| format!("{key:?}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            None => (self.key_string(id), String::new()),
        };
        StoreError::AssignmentToComputedEntry { key, relies_on }
    }

    fn info(&self, id: NodeId) -> Option<NodeInfo<K, V>> {
        let node = self.arena.get_node(id)?;
        Some(NodeInfo {
            key: node.key().clone(),
            value: node.value().cloned(),
            computed: node.is_computed(),
            dirty: node.is_dirty(),
            relies_on: self.key_list(node.relies_on()),
            dependents: self.key_list(node.dependents()),
        })
    }
}

struct Shared<K, V> {
    id: TableId,
    state: RwLock<TableState<K, V>>,
    subscribers: Subscribers<K, V>,
}

/// A hash table of literal and computed entries.
///
/// Cloning the table clones a handle; all clones share the same entries.
///
/// # Example
///
/// ```rust,ignore
/// let table = ComputeTable::new();
/// table.set("x", 5)?;
///
/// let reader = table.downgrade();
/// table.set_computed("y", move || Ok(reader.get(&"x")? * 2))?;
/// assert_eq!(table.get(&"y")?, 10);
///
/// table.set("x", 7)?;
/// assert_eq!(table.get(&"y")?, 14);
/// ```
///
/// Computations should capture a [`TableRef`] rather than a clone of the
/// table: a strong handle stored inside the table keeps it alive until
/// [`clear`](Self::clear) is called.
pub struct ComputeTable<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K: TableKey, V: TableValue> ComputeTable<K, V> {
    /// Create an empty table with the default configuration.
    pub fn new() -> Self {
        Self::build(TableConfig::default(), Arc::new(default_hash::<K>))
    }

    /// Create an empty table from a validated configuration.
    pub fn with_config(config: TableConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(default_hash::<K>)))
    }

    /// Create an empty table with a custom hash function.
    pub fn with_hasher<H>(config: TableConfig, hasher: H) -> Result<Self>
    where
        H: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::build(config, Arc::new(hasher)))
    }

    fn build(config: TableConfig, hasher: HashFn<K>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: TableId::new(),
                state: RwLock::new(TableState::new(config, hasher)),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// A weak handle for use inside computations.
    pub fn downgrade(&self) -> TableRef<K, V> {
        TableRef {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// The current configuration, including resizes and policy changes.
    pub fn config(&self) -> TableConfig {
        self.shared.state.read().config.clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.shared.state.read().arena.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.state.read().lookup(key).is_some()
    }

    pub fn bucket_count(&self) -> usize {
        self.shared.state.read().buckets.count()
    }

    /// Number of entries in each bucket.
    pub fn bucket_occupancy(&self) -> Vec<usize> {
        self.shared.state.read().buckets.occupancy()
    }

    pub fn assignment_policy(&self) -> AssignmentPolicy {
        self.shared.state.read().config.assignment_policy
    }

    pub fn set_assignment_policy(&self, policy: AssignmentPolicy) {
        self.shared.state.write().config.assignment_policy = policy;
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Store a literal value.
    ///
    /// Returns whether a new entry was inserted. Writing over a computed
    /// entry follows the table's [`AssignmentPolicy`].
    pub fn set(&self, key: K, value: V) -> Result<bool> {
        let (inserted, notification) = {
            let mut state = self.shared.state.write();
            let (id, inserted) = state.lookup_or_insert(key, Node::vacant);

            if !inserted && state.arena.get_node(id).is_some_and(Node::is_computed) {
                match state.config.assignment_policy {
                    AssignmentPolicy::Throw => {
                        let err = state.assignment_error(id);
                        warn!(error = %err, "literal write rejected");
                        return Err(err);
                    }
                    AssignmentPolicy::Ignore => {
                        debug!(key = %state.key_string(id), "literal write ignored");
                        return Ok(false);
                    }
                    AssignmentPolicy::Overwrite => {
                        state.arena.clear_dependencies(id);
                        if let Some(node) = state.arena.get_node_mut(id) {
                            node.clear_compute();
                        }
                        debug!(key = %state.key_string(id), "computation overwritten");
                    }
                }
            }

            if inserted {
                debug!(key = %state.key_string(id), "entry inserted");
            }
            (inserted, state.store_value(id, value))
        };

        if let Some(notification) = notification {
            notification.dispatch(&self.shared.subscribers);
        }
        Ok(inserted)
    }

    /// Store many literal values. Returns how many entries were inserted.
    pub fn extend_literals<I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut inserted = 0;
        for (key, value) in entries {
            if self.set(key, value)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Assign a computation to `key`.
    ///
    /// The computation runs once, right away, and every entry of this table
    /// it reads becomes a dependency. Returns whether a new entry was
    /// inserted.
    ///
    /// # Errors
    ///
    /// `RecursionDetected` if the computation reads `key`, directly or
    /// through other computed entries; `MaxDepthExceeded` if it reads more
    /// than `max_depth` entries; otherwise whatever the computation returned.
    /// On error the entry keeps its previous value, computation and edges,
    /// and an entry created by this call is removed again.
    ///
    /// `KeyNotFound` if the computation removed `key` before it could be
    /// installed.
    pub fn set_computed<F>(&self, key: K, compute: F) -> Result<bool>
    where
        F: Fn() -> Result<V> + Send + Sync + 'static,
    {
        let compute: ComputeFn<V> = Arc::new(compute);
        let (id, inserted, max_depth) = {
            let mut state = self.shared.state.write();
            let (id, inserted) = state.lookup_or_insert(key.clone(), Node::vacant);
            (id, inserted, state.config.max_depth)
        };

        let scope = TraceScope::enter(self.shared.id, id, max_depth);
        let outcome = compute();
        let traced = scope.finish();

        let committed = match (outcome, traced) {
            (Ok(value), Ok(trace)) => Ok((value, trace)),
            (_, Err(violation)) => Err(self.shared.state.read().violation_error(&violation)),
            (Err(err), Ok(_)) => Err(err),
        };

        let (value, trace) = match committed {
            Ok(committed) => committed,
            Err(err) => {
                if inserted {
                    let discarded = self.shared.state.write().remove_id(id);
                    drop(discarded);
                }
                warn!(error = %err, "computation rejected");
                return Err(err);
            }
        };

        let committed = self
            .shared
            .state
            .write()
            .commit_compute(id, &key, compute, trace, value);
        match committed {
            Ok(Some(notification)) => notification.dispatch(&self.shared.subscribers),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "entry removed while its computation ran");
                return Err(err);
            }
        }
        Ok(inserted)
    }

    /// Remove an entry and every edge touching it.
    ///
    /// Entries that relied on it are marked dirty. Returns its cached value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let node = self.shared.state.write().remove_key(key)?;
        debug!(key = ?key, dependents = node.dependents().len(), "entry removed");
        node.value().cloned()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.shared.state.write();
            state.buckets.clear();
            state.order.clear();
            std::mem::take(&mut state.arena)
        };
        debug!(entries = dropped.node_count(), "table cleared");
        // Computations may hold table handles; drop them unlocked.
        drop(dropped);
    }

    /// Rehash every entry into `bucket_count` buckets. Zero selects the
    /// default count.
    ///
    /// Values, computations, dirty flags and edges are untouched.
    pub fn resize(&self, bucket_count: usize) {
        let count = effective_bucket_count(bucket_count);
        let mut state = self.shared.state.write();
        state.rehash(count);
        state.config.bucket_count = count;
        debug!(buckets = count, entries = state.order.len(), "table resized");
    }

    /// Replace the hash function and rehash every entry.
    pub fn set_hash_function<H>(&self, hasher: H)
    where
        H: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        let mut state = self.shared.state.write();
        state.hasher = Arc::new(hasher);
        let count = state.buckets.count();
        state.rehash(count);
        debug!(buckets = count, "hash function replaced");
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Get the value of `key`, recomputing it if it is dirty.
    pub fn get(&self, key: &K) -> Result<V> {
        self.try_get(key)?
            .ok_or_else(|| StoreError::key_not_found(key))
    }

    /// Get the value of `key`, or `None` if it is absent.
    ///
    /// Errors only come from recomputation or from tracing.
    pub fn try_get(&self, key: &K) -> Result<Option<V>> {
        let id = self.shared.state.read().lookup(key);
        match id {
            Some(id) => self.read_node(id),
            None => Ok(None),
        }
    }

    /// Record the read in an active trace, then evaluate.
    fn read_node(&self, id: NodeId) -> Result<Option<V>> {
        let recorded = TraceScope::record(self.shared.id, id, |node| {
            self.shared.state.read().arena.upstream_of(node)
        });
        let force = match recorded {
            // Direct reads re-run so the trace sees what they read now
            Ok(Recorded::Direct) => true,
            Ok(Recorded::Nested | Recorded::Untraced) => false,
            Err(violation) => return Err(self.shared.state.read().violation_error(&violation)),
        };
        self.evaluate(id, force)
    }

    /// Return the cached value, refreshing stale upstream nodes and then
    /// the node itself if it is dirty or `force` is set.
    fn evaluate(&self, id: NodeId, force: bool) -> Result<Option<V>> {
        let stale = {
            let state = self.shared.state.read();
            let Some(node) = state.arena.get_node(id) else {
                return Ok(None);
            };
            if !node.is_computed() || !(force || node.is_dirty()) {
                return Ok(node.value().cloned());
            }
            state.arena.stale_upstream(id)
        };

        if !stale.is_empty() {
            trace!(node = id.raw(), stale = stale.len(), "refreshing upstream");
        }
        for upstream in stale {
            self.refresh(upstream, false)?;
        }
        self.refresh(id, force)
    }

    /// Recompute one node if it is still dirty, or unconditionally with
    /// `force`.
    ///
    /// A forced run that fails leaves the node as it was. The dirty flag is
    /// only ever set by invalidation.
    fn refresh(&self, id: NodeId, force: bool) -> Result<Option<V>> {
        let (compute, max_depth) = {
            let state = self.shared.state.read();
            let Some(node) = state.arena.get_node(id) else {
                return Ok(None);
            };
            let compute = if force {
                node.compute_fn()
            } else {
                node.pending_compute()
            };
            match compute {
                Some(compute) => (compute, state.config.max_depth),
                None => return Ok(node.value().cloned()),
            }
        };

        let _guard = EvalGuard::enter(self.shared.id, id, max_depth)
            .map_err(|chain| self.shared.state.read().depth_error(max_depth, &chain))?;
        trace!(node = id.raw(), "recomputing");
        let value = compute()?;

        let notification = self.shared.state.write().commit_recompute(id, value.clone());
        if let Some(notification) = notification {
            notification.dispatch(&self.shared.subscribers);
        }
        Ok(Some(value))
    }

    /// Iterate over `(key, value)` in insertion order.
    ///
    /// Values are read like `get`, so dirty entries recompute as the
    /// iterator reaches them.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        let state = self.shared.state.read();
        state
            .arena
            .keys_of(&state.order)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Current values in insertion order.
    pub fn values(&self) -> Result<Vec<V>> {
        self.iter().map(|entry| entry.map(|(_, value)| value)).collect()
    }

    /// Literal entries in insertion order. Computations are not included,
    /// which makes this the part of the table a caller can persist.
    pub fn literals(&self) -> Vec<(K, V)> {
        let state = self.shared.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.arena.get_node(*id))
            .filter(|node| !node.is_computed())
            .filter_map(|node| Some((node.key().clone(), node.value()?.clone())))
            .collect()
    }

    /// Listing of entries in insertion order, one per line, as
    /// `key: value /* relies on: a, b */`.
    pub fn dump(&self, include_computed: bool) -> Result<String> {
        self.dump_with(include_computed, false)
    }

    /// Like [`dump`](Self::dump), optionally listing dependents too:
    /// `key: value /* relies on: a; dependents: c */`.
    pub fn dump_with(&self, include_computed: bool, show_dependents: bool) -> Result<String> {
        let mut lines = Vec::new();
        for entry in self.iter() {
            let (key, value) = entry?;
            let Some(info) = self.node_info(&key) else {
                continue;
            };
            if info.computed && !include_computed {
                continue;
            }

            let mut notes = Vec::new();
            if !info.relies_on.is_empty() {
                notes.push(format!("relies on: {}", join_keys(&info.relies_on)));
            }
            if show_dependents && !info.dependents.is_empty() {
                notes.push(format!("dependents: {}", join_keys(&info.dependents)));
            }

            let mut line = format!("{key:?}: {value:?}");
            if !notes.is_empty() {
                line.push_str(&format!(" /* {} */", notes.join("; ")));
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Snapshot of an entry without recomputing it.
    pub fn node_info(&self, key: &K) -> Option<NodeInfo<K, V>> {
        let state = self.shared.state.read();
        state.info(state.lookup(key)?)
    }

    pub fn is_computed(&self, key: &K) -> Result<bool> {
        self.node_info(key)
            .map(|info| info.computed)
            .ok_or_else(|| StoreError::key_not_found(key))
    }

    /// Keys the entry's computation read during its last trace.
    pub fn relies_on(&self, key: &K) -> Result<Vec<K>> {
        self.node_info(key)
            .map(|info| info.relies_on)
            .ok_or_else(|| StoreError::key_not_found(key))
    }

    /// Keys whose computation read the entry.
    pub fn dependents(&self, key: &K) -> Result<Vec<K>> {
        self.node_info(key)
            .map(|info| info.dependents)
            .ok_or_else(|| StoreError::key_not_found(key))
    }

    // ------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------

    /// Call `callback` with `(key, old, new)` whenever any cached value
    /// changes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&K, Option<&V>, &V) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(Arc::new(callback))
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.subscribers.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    /// Set the change callback of a single entry, replacing any previous one.
    pub fn set_on_change<F>(&self, key: &K, callback: F) -> Result<()>
    where
        F: Fn(&K, Option<&V>, &V) + Send + Sync + 'static,
    {
        self.replace_on_change(key, Some(Arc::new(callback)))
    }

    pub fn clear_on_change(&self, key: &K) -> Result<()> {
        self.replace_on_change(key, None)
    }

    fn replace_on_change(&self, key: &K, callback: Option<ChangeCallback<K, V>>) -> Result<()> {
        let mut state = self.shared.state.write();
        let id = state
            .lookup(key)
            .ok_or_else(|| StoreError::key_not_found(key))?;
        if let Some(node) = state.arena.get_node_mut(id) {
            node.set_on_change(callback);
        }
        Ok(())
    }
}

impl<K: TableKey, V: TableValue> Default for ComputeTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for ComputeTable<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: TableKey, V: TableValue> Debug for ComputeTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("ComputeTable")
            .field("id", &self.shared.id)
            .field("len", &state.arena.node_count())
            .field("bucket_count", &state.buckets.count())
            .field("subscriber_count", &self.shared.subscribers.len())
            .finish()
    }
}

impl<'a, K: TableKey, V: TableValue> IntoIterator for &'a ComputeTable<K, V> {
    type Item = Result<(K, V)>;
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Weak handle to a [`ComputeTable`], meant to be captured by computations.
pub struct TableRef<K, V> {
    shared: Weak<Shared<K, V>>,
}

impl<K: TableKey, V: TableValue> TableRef<K, V> {
    pub fn upgrade(&self) -> Option<ComputeTable<K, V>> {
        self.shared.upgrade().map(|shared| ComputeTable { shared })
    }

    /// Same as [`ComputeTable::get`]; fails with `TableDropped` once the
    /// table is gone.
    pub fn get(&self, key: &K) -> Result<V> {
        self.upgrade().ok_or(StoreError::TableDropped)?.get(key)
    }

    /// Same as [`ComputeTable::try_get`]; fails with `TableDropped` once
    /// the table is gone.
    pub fn try_get(&self, key: &K) -> Result<Option<V>> {
        self.upgrade().ok_or(StoreError::TableDropped)?.try_get(key)
    }
}

impl<K, V> Clone for TableRef<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}
