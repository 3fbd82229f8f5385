//! # Rank Counter Map
//!
//! Bottom-up traversal needs to know, per node, how many of its children
//! have already been processed. This module provides that counter as a map
//! keyed by node identity (the `Arc` address), shared by all workers of a
//! bottom-up stage.
//!
//! The counter protocol is consume-on-completion: [`RankMap::complete`]
//! atomically takes the counter once it has reached the required child
//! count. Re-buffered copies of the same parent race for that take; exactly
//! one wins and gets to process the node, the rest observe an empty counter
//! and drop their copy.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use super::node::NodeRef;

/// Identity-keyed child-completion counters for one pipeline stage.
#[derive(Default)]
pub(crate) struct RankMap {
    count: RwLock<HashMap<usize, u32>>,
}

impl RankMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn key<T>(node: &NodeRef<T>) -> usize {
        Arc::as_ptr(node) as usize
    }

    /// Current counter value for `node` (zero if never incremented).
    pub(crate) fn get<T>(&self, node: &NodeRef<T>) -> u32 {
        self.count.read().get(&Self::key(node)).copied().unwrap_or(0)
    }

    /// Adds one to the counter for `node`; returns the new value.
    pub(crate) fn increment<T>(&self, node: &NodeRef<T>) -> u32 {
        let mut count = self.count.write();
        let slot = count.entry(Self::key(node)).or_insert(0);
        *slot += 1;
        *slot
    }

    /// Consumes the counter for `node` if it has reached `need`.
    ///
    /// Returns `true` for exactly one caller once all children are accounted
    /// for; the counter is removed in the same critical section, so a racing
    /// duplicate sees zero and backs off.
    pub(crate) fn complete<T>(&self, node: &NodeRef<T>, need: u32) -> bool {
        let mut count = self.count.write();
        let key = Self::key(node);
        match count.get(&key) {
            Some(&n) if n >= need => {
                count.remove(&key);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::Node;

    #[test]
    fn counters_start_at_zero() {
        let map = RankMap::new();
        let n = Node::new(1);
        assert_eq!(map.get(&n), 0);
    }

    #[test]
    fn increment_counts_per_identity() {
        let map = RankMap::new();
        let a = Node::new(1);
        let b = Node::new(1);
        assert_eq!(map.increment(&a), 1);
        assert_eq!(map.increment(&a), 2);
        assert_eq!(map.increment(&b), 1, "distinct nodes count separately");
    }

    #[test]
    fn complete_consumes_exactly_once() {
        let map = RankMap::new();
        let n = Node::new(1);
        map.increment(&n);
        map.increment(&n);
        assert!(!map.complete(&n, 3), "two of three children done");
        map.increment(&n);
        assert!(map.complete(&n, 3));
        assert!(!map.complete(&n, 3), "second take sees a drained counter");
        assert_eq!(map.get(&n), 0);
    }
}
