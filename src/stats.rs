//! Compile-time-optional statistics, gated behind the `stats` feature:
//! live counts of each node kind, counts of grow/shrink events per kind,
//! key-prefix-split count, and QSBR epoch-change and queue-length
//! counters. All counters use relaxed atomics — they're diagnostic, not
//! synchronizing, so there is nothing for a stronger ordering to protect.

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

use crate::nodes::header::NodeType;

/// One counter per node kind, plus the cross-cutting counters below.
#[derive(Debug, Default)]
pub struct NodeStats {
    /// Live count of `Inner4` nodes.
    pub node4_count: AtomicU64,
    /// Live count of `Inner16` nodes.
    pub node16_count: AtomicU64,
    /// Live count of `Inner48` nodes.
    pub node48_count: AtomicU64,
    /// Live count of `Inner256` nodes.
    pub node256_count: AtomicU64,
    /// Live count of leaf nodes.
    pub leaf_count: AtomicU64,
    /// Number of grow (promote) events, summed across all node kinds.
    pub grow_count: AtomicU64,
    /// Number of shrink (demote/collapse) events, summed across all node
    /// kinds.
    pub shrink_count: AtomicU64,
    /// Number of times an insert split an existing key prefix.
    pub prefix_split_count: AtomicU64,
}

impl NodeStats {
    /// Record a relaxed increment on the given counter.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a relaxed decrement on the given counter.
    pub fn drop_one(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    /// Snapshot the current value of a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Record the allocation of a node of the given kind.
    pub(crate) fn record_alloc(&self, node_type: NodeType) {
        Self::bump(self.counter_for(node_type));
    }

    /// Record the deallocation of a node of the given kind.
    pub(crate) fn record_free(&self, node_type: NodeType) {
        Self::drop_one(self.counter_for(node_type));
    }

    fn counter_for(&self, node_type: NodeType) -> &AtomicU64 {
        match node_type {
            NodeType::Node4 => &self.node4_count,
            NodeType::Node16 => &self.node16_count,
            NodeType::Node48 => &self.node48_count,
            NodeType::Node256 => &self.node256_count,
            NodeType::Leaf => &self.leaf_count,
        }
    }
}

/// The process-wide node-kind counters. One instance shared by every tree in
/// the process, since the counters exist for observability, not per-tree
/// accounting.
pub static NODE_STATS: Lazy<NodeStats> = Lazy::new(NodeStats::default);

/// QSBR-side counters, separate from the node-kind stats above because they
/// live on the global epoch state rather than on a per-tree struct.
#[derive(Debug, Default)]
pub struct QsbrStats {
    /// Number of times the global epoch advanced.
    pub epoch_change_count: AtomicU64,
    /// Number of deallocation requests retired in total.
    pub retire_count: AtomicU64,
    /// Number of times a thread's queues were moved to the orphan lists.
    pub orphan_adoption_count: AtomicU64,
    /// High-water mark of any single thread's pending-deallocation queue
    /// length.
    pub max_queue_len: AtomicU64,
}

impl QsbrStats {
    /// Update the high-water mark for queue length.
    pub fn observe_queue_len(&self, len: u64) {
        self.max_queue_len.fetch_max(len, Ordering::Relaxed);
    }
}
