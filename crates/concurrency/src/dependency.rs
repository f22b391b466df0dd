//! Dependency tracking
//!
//! An edge `blocker -> blocked` means `blocked` is waiting on `blocker`,
//! either queued behind it on a record lock or holding a dirty read of its
//! data. Every edge is recorded exactly once by [`DependencyTracker::add_edge`]
//! and undone exactly once by [`DependencyTracker::remove_edge`].
//!
//! Two strategies are available, chosen by [`TrackingMode`]:
//!
//! - **Counting**: per-transaction in/out degree counters. O(1) per edge.
//! - **Full graph**: counters plus explicit direct-edge multisets and a
//!   reach set (transactions that transitively wait on this one) per
//!   transaction, each behind its own lock.
//!
//! Counters exist in both modes since they feed the encoder features.

use crate::config::{DeadlockStrategy, TrackingMode};
use crate::descriptor::TransactionDescriptor;
use morph_core::TxnId;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Direct edge endpoint with multiplicity
#[derive(Debug)]
struct Edge {
    peer: Weak<TransactionDescriptor>,
    count: u32,
}

/// Explicit adjacency of one transaction
#[derive(Debug, Default)]
pub(crate) struct GraphNode {
    /// Transactions this one waits on
    blocked_on: FxHashMap<TxnId, Edge>,
    /// Transactions waiting on this one
    blocking: FxHashMap<TxnId, Edge>,
    /// Transactions that transitively wait on this one
    reach: FxHashSet<TxnId>,
}

/// Per-transaction dependency bookkeeping
#[derive(Debug)]
pub struct DependencyState {
    dep_on: AtomicU32,
    dep_by: AtomicU32,
    graph: Option<Mutex<GraphNode>>,
}

impl DependencyState {
    pub(crate) fn new(mode: TrackingMode) -> Self {
        Self {
            dep_on: AtomicU32::new(0),
            dep_by: AtomicU32::new(0),
            graph: match mode {
                TrackingMode::Counting => None,
                TrackingMode::FullGraph => Some(Mutex::new(GraphNode::default())),
            },
        }
    }

    /// Number of transactions this one waits on (with multiplicity)
    #[inline]
    pub fn dep_on(&self) -> u32 {
        self.dep_on.load(Ordering::Acquire)
    }

    /// Number of transactions waiting on this one (with multiplicity)
    #[inline]
    pub fn dep_by(&self) -> u32 {
        self.dep_by.load(Ordering::Acquire)
    }

    /// Whether `txn` transitively waits on this transaction
    ///
    /// Always false in counting mode.
    pub fn reaches(&self, txn: TxnId) -> bool {
        self.graph
            .as_ref()
            .map_or(false, |g| g.lock().reach.contains(&txn))
    }

    /// Copy of the reach set (empty in counting mode)
    pub fn reach(&self) -> Vec<TxnId> {
        let mut out: Vec<TxnId> = self
            .graph
            .as_ref()
            .map(|g| g.lock().reach.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Whether no edge touches this transaction
    pub fn is_clear(&self) -> bool {
        self.dep_on() == 0
            && self.dep_by() == 0
            && self.graph.as_ref().map_or(true, |g| {
                let g = g.lock();
                g.blocked_on.is_empty() && g.blocking.is_empty() && g.reach.is_empty()
            })
    }
}

fn decrement(counter: &AtomicU32, what: &str, txn: TxnId) {
    let prev = counter.fetch_sub(1, Ordering::AcqRel);
    assert!(prev > 0, "{} counter of {} went negative", what, txn);
}

/// Edge bookkeeping strategy
#[derive(Debug, Clone, Copy)]
pub struct DependencyTracker {
    mode: TrackingMode,
    check: DeadlockStrategy,
}

impl DependencyTracker {
    /// Tracker with the given storage mode and admission check
    pub fn new(mode: TrackingMode, check: DeadlockStrategy) -> Self {
        Self { mode, check }
    }

    /// Storage mode
    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Admission check
    pub fn check(&self) -> DeadlockStrategy {
        self.check
    }

    /// Record that `blocked` now waits on `blocker`
    pub fn add_edge(&self, blocker: &Arc<TransactionDescriptor>, blocked: &Arc<TransactionDescriptor>) {
        assert_ne!(blocker.id(), blocked.id(), "transaction cannot wait on itself");
        blocked.deps().dep_on.fetch_add(1, Ordering::AcqRel);
        blocker.deps().dep_by.fetch_add(1, Ordering::AcqRel);

        if self.mode != TrackingMode::FullGraph {
            return;
        }
        let (Some(blocker_graph), Some(blocked_graph)) =
            (blocker.deps().graph.as_ref(), blocked.deps().graph.as_ref())
        else {
            return;
        };

        // Snapshot the waiter's reach first; never hold two node locks.
        let inherited: Vec<TxnId> = {
            let mut node = blocked_graph.lock();
            node.blocked_on
                .entry(blocker.id())
                .or_insert_with(|| Edge {
                    peer: Arc::downgrade(blocker),
                    count: 0,
                })
                .count += 1;
            node.reach.iter().copied().collect()
        };

        let mut node = blocker_graph.lock();
        node.blocking
            .entry(blocked.id())
            .or_insert_with(|| Edge {
                peer: Arc::downgrade(blocked),
                count: 0,
            })
            .count += 1;
        node.reach.insert(blocked.id());
        node.reach.extend(inherited);
    }

    /// Undo one `add_edge(blocker, blocked)`
    ///
    /// # Panics
    ///
    /// Panics if the edge was never added.
    pub fn remove_edge(
        &self,
        blocker: &Arc<TransactionDescriptor>,
        blocked: &Arc<TransactionDescriptor>,
    ) {
        decrement(&blocked.deps().dep_on, "dep_on", blocked.id());
        decrement(&blocker.deps().dep_by, "dep_by", blocker.id());

        if self.mode != TrackingMode::FullGraph {
            return;
        }
        let (Some(blocker_graph), Some(blocked_graph)) =
            (blocker.deps().graph.as_ref(), blocked.deps().graph.as_ref())
        else {
            return;
        };

        {
            let mut node = blocked_graph.lock();
            Self::drop_edge(&mut node.blocked_on, blocker.id());
        }
        {
            let mut node = blocker_graph.lock();
            Self::drop_edge(&mut node.blocking, blocked.id());
        }
        Self::propagate_removal(blocker);
    }

    fn drop_edge(edges: &mut FxHashMap<TxnId, Edge>, peer: TxnId) {
        let edge = edges
            .get_mut(&peer)
            .unwrap_or_else(|| panic!("missing dependency edge to {}", peer));
        edge.count -= 1;
        if edge.count == 0 {
            edges.remove(&peer);
        }
    }

    /// Recompute reach sets from `start` upward along waits-on edges
    fn propagate_removal(start: &Arc<TransactionDescriptor>) {
        let mut visited = FxHashSet::default();
        let mut stack = vec![Arc::clone(start)];
        while let Some(txn) = stack.pop() {
            if !visited.insert(txn.id()) {
                continue;
            }
            let Some(graph) = txn.deps().graph.as_ref() else {
                continue;
            };
            let children: Vec<Arc<TransactionDescriptor>> = graph
                .lock()
                .blocking
                .values()
                .filter_map(|e| e.peer.upgrade())
                .collect();

            let mut reach = FxHashSet::default();
            for child in &children {
                reach.insert(child.id());
                if let Some(g) = child.deps().graph.as_ref() {
                    reach.extend(g.lock().reach.iter().copied());
                }
            }
            // A cycle may carry our own id back in.
            reach.remove(&txn.id());

            let parents: Vec<Arc<TransactionDescriptor>> = {
                let mut node = graph.lock();
                node.reach = reach;
                node.blocked_on
                    .values()
                    .filter_map(|e| e.peer.upgrade())
                    .collect()
            };
            stack.extend(parents);
        }
    }

    /// Whether queueing `requester` behind `owner` risks a wait cycle
    pub fn has_potential_cycle(
        &self,
        owner: &TransactionDescriptor,
        requester: &TransactionDescriptor,
    ) -> bool {
        self.check.has_deadlock(owner, requester)
    }

    /// Fold the owner's avoidance metadata into a newly queued requester
    pub fn merge(&self, owner: &TransactionDescriptor, requester: &TransactionDescriptor) {
        self.check.merge(owner, requester);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context_with, descriptor};
    use crate::config::CcConfig;
    use proptest::prelude::*;

    fn full_graph_ctx() -> Arc<crate::CcContext> {
        context_with(
            CcConfig::default()
                .with_tracking(TrackingMode::FullGraph)
                .with_deadlock(DeadlockStrategy::DependencyGraph),
        )
    }

    #[test]
    fn test_counting_add_remove() {
        let ctx = context_with(CcConfig::default());
        let tracker = *ctx.tracker();
        let a = descriptor(&ctx, 1);
        let b = descriptor(&ctx, 2);

        tracker.add_edge(&a, &b);
        assert_eq!(b.deps().dep_on(), 1);
        assert_eq!(a.deps().dep_by(), 1);
        assert!(!a.deps().reaches(b.id()));

        tracker.remove_edge(&a, &b);
        assert!(a.deps().is_clear());
        assert!(b.deps().is_clear());
    }

    #[test]
    #[should_panic(expected = "went negative")]
    fn test_counter_underflow_panics() {
        let ctx = context_with(CcConfig::default());
        let a = descriptor(&ctx, 1);
        let b = descriptor(&ctx, 2);
        ctx.tracker().remove_edge(&a, &b);
    }

    #[test]
    fn test_full_graph_transitive_merge() {
        let ctx = full_graph_ctx();
        let tracker = *ctx.tracker();
        let a = descriptor(&ctx, 1);
        let b = descriptor(&ctx, 2);
        let c = descriptor(&ctx, 3);

        // c waits on b, then b waits on a: a's reach picks up c through b
        tracker.add_edge(&b, &c);
        tracker.add_edge(&a, &b);
        assert_eq!(a.deps().reach(), vec![b.id(), c.id()]);
        assert_eq!(b.deps().reach(), vec![c.id()]);

        tracker.remove_edge(&b, &c);
        assert_eq!(b.deps().reach(), Vec::<TxnId>::new());
        assert_eq!(a.deps().reach(), vec![b.id()]);

        tracker.remove_edge(&a, &b);
        for t in [&a, &b, &c] {
            assert!(t.deps().is_clear());
        }
    }

    #[test]
    fn test_full_graph_multiset_edges() {
        let ctx = full_graph_ctx();
        let tracker = *ctx.tracker();
        let a = descriptor(&ctx, 1);
        let b = descriptor(&ctx, 2);

        tracker.add_edge(&a, &b);
        tracker.add_edge(&a, &b);
        tracker.remove_edge(&a, &b);
        assert!(a.deps().reaches(b.id()));
        assert_eq!(b.deps().dep_on(), 1);

        tracker.remove_edge(&a, &b);
        assert!(a.deps().is_clear());
        assert!(b.deps().is_clear());
    }

    proptest! {
        #[test]
        fn prop_balanced_edges_conserve_counters(
            edges in proptest::collection::vec((0usize..5, 0usize..5), 0..40),
            full in any::<bool>(),
        ) {
            let config = if full {
                CcConfig::default().with_tracking(TrackingMode::FullGraph)
            } else {
                CcConfig::default()
            };
            let ctx = context_with(config);
            let tracker = *ctx.tracker();
            let txns: Vec<_> = (0..5u64).map(|i| descriptor(&ctx, i + 1)).collect();
            let edges: Vec<_> = edges.into_iter().filter(|(a, b)| a != b).collect();

            for (a, b) in &edges {
                tracker.add_edge(&txns[*a], &txns[*b]);
            }
            for (a, b) in edges.iter().rev() {
                tracker.remove_edge(&txns[*a], &txns[*b]);
            }
            for t in &txns {
                prop_assert!(t.deps().is_clear());
            }
        }
    }
}
