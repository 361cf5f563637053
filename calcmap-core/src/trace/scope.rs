//! Trace Scopes
//!
//! A trace scope records which nodes a computation reads while it is being
//! assigned. The scope is an RAII guard over a frame on a thread-local
//! stack: entering pushes a frame, finishing (or dropping, if the
//! computation panics) pops it.
//!
//! Frames are per thread, so two threads assigning computations at the same
//! time each see only their own path. Nested scopes are allowed; reads are
//! recorded into the innermost frame only, and only when that frame belongs
//! to the table being read.
//!
//! Recording a node also records everything upstream of it, walked through
//! the `upstream` lookup the caller passes in. The path is a set in first
//! visit order, so a read costs nothing once its node is already known.
//!
//! The same module bounds nested recomputation with [`EvalGuard`], so a
//! long chain of dirty entries fails with an error instead of exhausting the
//! stack.

use std::cell::RefCell;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::TableId;
use crate::graph::NodeId;

thread_local! {
    static TRACE_STACK: RefCell<Vec<TraceFrame>> = RefCell::new(Vec::new());
    static EVAL_STACK: RefCell<Vec<(TableId, NodeId)>> = RefCell::new(Vec::new());
}

/// Nodes read by a trace, in first-visit order.
pub type TracePath = IndexSet<NodeId>;

/// What a finished trace saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    /// Every node read, upstream closures included.
    pub path: TracePath,
    /// Nodes read by the traced computation itself.
    pub reads: TracePath,
}

/// One active trace.
#[derive(Debug)]
struct TraceFrame {
    /// Table whose reads are recorded.
    table: TableId,
    /// Node whose computation is being assigned.
    target: NodeId,
    /// Path length at which recording fails.
    max_depth: usize,
    /// Recomputation depth of `table` when the scope was entered.
    eval_base: usize,
    /// Nodes read so far, upstream closures included.
    path: TracePath,
    /// Direct reads only.
    reads: TracePath,
    /// First refused read. Kept even if the computation swallows the error.
    violation: Option<TraceViolation>,
}

/// Why a read was refused during a trace.
///
/// Both variants carry the path with the offending node appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceViolation {
    /// The node under construction was read.
    Recursion { path: Vec<NodeId> },
    /// The path of `target` reached the depth cap.
    MaxDepth {
        target: NodeId,
        max_depth: usize,
        path: Vec<NodeId>,
    },
}

/// How a read was seen by the innermost trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// No trace of this table is innermost on this thread.
    Untraced,
    /// Read by the computation being assigned.
    Direct,
    /// Read by a recomputation running inside the trace.
    Nested,
}

/// Guard for an active trace. Pops its frame when finished or dropped.
pub struct TraceScope {
    table: TableId,
    target: NodeId,
    finished: bool,
}

impl TraceScope {
    /// Start recording reads of `table` made on this thread.
    pub fn enter(table: TableId, target: NodeId, max_depth: usize) -> Self {
        let eval_base = EvalGuard::depth(table);
        TRACE_STACK.with(|stack| {
            stack.borrow_mut().push(TraceFrame {
                table,
                target,
                max_depth,
                eval_base,
                path: TracePath::new(),
                reads: TracePath::new(),
                violation: None,
            });
        });

        Self {
            table,
            target,
            finished: false,
        }
    }

    /// Check whether the innermost trace on this thread records `table`.
    #[cfg(test)]
    pub fn is_active(table: TableId) -> bool {
        TRACE_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|frame| frame.table == table)
        })
    }

    /// Record a read of `node` and of everything `upstream` reaches from it.
    ///
    /// `upstream` is only called for nodes not yet on the path, and never
    /// when no trace for `table` is innermost.
    pub fn record<F, I>(table: TableId, node: NodeId, upstream: F) -> Result<Recorded, TraceViolation>
    where
        F: Fn(NodeId) -> I,
        I: IntoIterator<Item = NodeId>,
    {
        TRACE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(frame) = stack.last_mut().filter(|frame| frame.table == table) else {
                return Ok(Recorded::Untraced);
            };
            let direct = EvalGuard::depth(table) == frame.eval_base;

            let mut pending: SmallVec<[NodeId; 16]> = SmallVec::new();
            pending.push(node);
            while let Some(next) = pending.pop() {
                let violation = if next == frame.target {
                    let mut path: Vec<NodeId> = frame.path.iter().copied().collect();
                    path.push(next);
                    TraceViolation::Recursion { path }
                } else if frame.path.contains(&next) {
                    continue;
                } else if frame.path.len() >= frame.max_depth {
                    let mut path: Vec<NodeId> = frame.path.iter().copied().collect();
                    path.push(next);
                    TraceViolation::MaxDepth {
                        target: frame.target,
                        max_depth: frame.max_depth,
                        path,
                    }
                } else {
                    frame.path.insert(next);
                    let before = pending.len();
                    pending.extend(upstream(next));
                    // First dependency on top, so the path keeps read order
                    pending[before..].reverse();
                    continue;
                };

                frame.violation.get_or_insert_with(|| violation.clone());
                return Err(violation);
            }

            if direct {
                frame.reads.insert(node);
                Ok(Recorded::Direct)
            } else {
                Ok(Recorded::Nested)
            }
        })
    }

    /// Stop recording and return what was read, or the first refused read.
    pub fn finish(mut self) -> Result<Trace, TraceViolation> {
        self.finished = true;
        match self.pop() {
            Some(TraceFrame {
                violation: Some(violation),
                ..
            }) => Err(violation),
            Some(frame) => Ok(Trace {
                path: frame.path,
                reads: frame.reads,
            }),
            None => Ok(Trace::default()),
        }
    }

    fn pop(&self) -> Option<TraceFrame> {
        TRACE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right frame.
            if let Some(frame) = &popped {
                debug_assert!(
                    frame.table == self.table && frame.target == self.target,
                    "TraceScope mismatch: expected {:?}/{:?}, got {:?}/{:?}",
                    self.table,
                    self.target,
                    frame.table,
                    frame.target
                );
            }
            popped
        })
    }
}

impl Drop for TraceScope {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Guard for one level of nested recomputation.
pub struct EvalGuard {
    table: TableId,
    node: NodeId,
}

impl EvalGuard {
    /// Enter the recomputation of `node`.
    ///
    /// Fails with the chain of nodes being recomputed on this thread, plus
    /// `node`, if `max_depth` recomputations of `table` are already running.
    pub fn enter(table: TableId, node: NodeId, max_depth: usize) -> Result<Self, Vec<NodeId>> {
        EVAL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.iter().filter(|(t, _)| *t == table).count();
            if depth >= max_depth {
                let chain = stack
                    .iter()
                    .filter(|(t, _)| *t == table)
                    .map(|(_, n)| *n)
                    .chain(std::iter::once(node))
                    .collect();
                return Err(chain);
            }
            stack.push((table, node));
            Ok(Self { table, node })
        })
    }

    /// Number of recomputations of `table` running on this thread.
    pub fn depth(table: TableId) -> usize {
        EVAL_STACK.with(|stack| stack.borrow().iter().filter(|(t, _)| *t == table).count())
    }
}

impl Drop for EvalGuard {
    fn drop(&mut self) {
        EVAL_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(popped, Some((self.table, self.node)), "EvalGuard mismatch");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn none(_: NodeId) -> Option<NodeId> {
        None
    }

    #[test]
    fn scope_records_reads() {
        let table = TableId::new();
        let target = NodeId::new();
        let (a, b) = (NodeId::new(), NodeId::new());

        assert!(!TraceScope::is_active(table));
        assert_eq!(TraceScope::record(table, a, none), Ok(Recorded::Untraced));

        let scope = TraceScope::enter(table, target, 10);
        assert!(TraceScope::is_active(table));
        assert_eq!(TraceScope::record(table, a, none), Ok(Recorded::Direct));
        assert_eq!(TraceScope::record(table, b, none), Ok(Recorded::Direct));
        assert_eq!(TraceScope::record(table, a, none), Ok(Recorded::Direct));

        let trace = scope.finish().unwrap();
        assert_eq!(trace.path.iter().copied().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(trace.reads, trace.path);

        // Frame should be gone after finish
        assert!(!TraceScope::is_active(table));
    }

    #[test]
    fn upstream_closure_is_recorded_in_read_order() {
        let table = TableId::new();
        let target = NodeId::new();
        let (a, b, c, d) = (NodeId::new(), NodeId::new(), NodeId::new(), NodeId::new());
        let edges: HashMap<NodeId, Vec<NodeId>> =
            [(a, vec![b, c]), (b, vec![d]), (c, vec![d])].into_iter().collect();

        let scope = TraceScope::enter(table, target, 10);
        TraceScope::record(table, a, |n| edges.get(&n).cloned().unwrap_or_default()).unwrap();

        let trace = scope.finish().unwrap();
        assert_eq!(trace.path.iter().copied().collect::<Vec<_>>(), vec![a, b, d, c]);
        assert_eq!(trace.reads.iter().copied().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn other_tables_are_not_recorded() {
        let table = TableId::new();
        let other = TableId::new();
        let scope = TraceScope::enter(table, NodeId::new(), 10);

        let called = std::cell::Cell::new(false);
        let result = TraceScope::record(other, NodeId::new(), |_| {
            called.set(true);
            None::<NodeId>
        });
        assert_eq!(result, Ok(Recorded::Untraced));
        assert!(!called.get());
        assert!(scope.finish().unwrap().path.is_empty());
    }

    #[test]
    fn target_read_is_recursion() {
        let table = TableId::new();
        let target = NodeId::new();
        let a = NodeId::new();
        let _scope = TraceScope::enter(table, target, 10);

        TraceScope::record(table, a, none).unwrap();
        let violation = TraceScope::record(table, target, none).unwrap_err();
        assert_eq!(violation, TraceViolation::Recursion { path: vec![a, target] });
    }

    #[test]
    fn target_upstream_is_recursion() {
        let table = TableId::new();
        let target = NodeId::new();
        let a = NodeId::new();
        let _scope = TraceScope::enter(table, target, 10);

        let violation = TraceScope::record(table, a, |n| (n == a).then_some(target)).unwrap_err();
        assert_eq!(violation, TraceViolation::Recursion { path: vec![a, target] });
    }

    #[test]
    fn path_length_is_capped() {
        let table = TableId::new();
        let _scope = TraceScope::enter(table, NodeId::new(), 2);

        TraceScope::record(table, NodeId::new(), none).unwrap();
        TraceScope::record(table, NodeId::new(), none).unwrap();
        let violation = TraceScope::record(table, NodeId::new(), none).unwrap_err();
        assert!(matches!(
            violation,
            TraceViolation::MaxDepth { max_depth: 2, ref path, .. } if path.len() == 3
        ));
    }

    #[test]
    fn nested_scopes() {
        let table = TableId::new();
        let (outer_target, inner_target) = (NodeId::new(), NodeId::new());
        let (a, b) = (NodeId::new(), NodeId::new());

        let outer = TraceScope::enter(table, outer_target, 10);
        TraceScope::record(table, a, none).unwrap();
        {
            let inner = TraceScope::enter(table, inner_target, 10);
            TraceScope::record(table, b, none).unwrap();
            assert_eq!(inner.finish().unwrap().path.iter().copied().collect::<Vec<_>>(), vec![b]);
        }

        // After inner scope finishes, outer should be recording again
        TraceScope::record(table, b, none).unwrap();
        assert_eq!(outer.finish().unwrap().path.iter().copied().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn reads_under_recomputation_are_nested() {
        let table = TableId::new();
        let (target, a, b) = (NodeId::new(), NodeId::new(), NodeId::new());
        let scope = TraceScope::enter(table, target, 10);

        assert_eq!(TraceScope::record(table, a, none), Ok(Recorded::Direct));
        {
            let _guard = EvalGuard::enter(table, a, 10).unwrap();
            assert_eq!(TraceScope::record(table, b, none), Ok(Recorded::Nested));
        }
        let trace = scope.finish().unwrap();
        assert_eq!(trace.path.len(), 2);
        assert_eq!(trace.reads.iter().copied().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn swallowed_violation_still_fails_finish() {
        let table = TableId::new();
        let target = NodeId::new();
        let scope = TraceScope::enter(table, target, 10);

        // A computation that ignores the error keeps going
        let _ = TraceScope::record(table, target, none);
        TraceScope::record(table, NodeId::new(), none).unwrap();

        assert_eq!(
            scope.finish(),
            Err(TraceViolation::Recursion { path: vec![target] })
        );
    }

    #[test]
    fn dropped_scope_pops_frame() {
        let table = TableId::new();
        {
            let _scope = TraceScope::enter(table, NodeId::new(), 10);
            assert!(TraceScope::is_active(table));
        }
        assert!(!TraceScope::is_active(table));
    }

    #[test]
    fn threads_do_not_share_frames() {
        let table = TableId::new();
        let _scope = TraceScope::enter(table, NodeId::new(), 10);

        let seen = std::thread::spawn(move || TraceScope::is_active(table))
            .join()
            .unwrap();
        assert!(!seen);
        assert!(TraceScope::is_active(table));
    }

    #[test]
    fn eval_guard_bounds_depth() {
        let table = TableId::new();
        let (a, b, c) = (NodeId::new(), NodeId::new(), NodeId::new());

        let _ga = EvalGuard::enter(table, a, 2).unwrap();
        {
            let _gb = EvalGuard::enter(table, b, 2).unwrap();
            assert_eq!(EvalGuard::depth(table), 2);
            let chain = EvalGuard::enter(table, c, 2).err().unwrap();
            assert_eq!(chain, vec![a, b, c]);
        }
        assert_eq!(EvalGuard::depth(table), 1);
    }
}
