//! # Persistent Indexed Sequence
//!
//! An immutable vector over a bit-partitioned trie with a tail buffer.
//! Indexing splits into `bits`-wide digits: each trie level consumes one
//! digit, the bottom digit selects within a leaf. The most recent values
//! live outside the trie in the tail, which amortizes appends: only every
//! `degree`-th push migrates a full tail into the trie.
//!
//! ```text
//! Vector(len=7, bits=1)          tail: [6]
//!         root  (shift=2)
//!        ／    ＼
//!      ▪        ▪
//!     ／ ＼    ／
//! [0,1] [2,3] [4,5]
//! ```
//!
//! ## Copy-on-Write
//!
//! Mutating operations return a new incarnation; only the spine from the
//! root to the touched leaf is cloned, everything else is shared. The tail
//! is small (at most `degree` values) and simply copied.
//!
//! ## Invariants
//!
//! - `length == tail_offset + tail.len()`
//! - every leaf reachable from the root holds exactly `degree` values; only
//!   the tail may hold fewer
//! - every root-to-leaf path has `shift/bits + 1` edges

use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use tracing::trace;

use super::node::{new_path, VNode};
use crate::config::{DEFAULT_DEGREE_EXPONENT, MAX_DEGREE_EXPONENT, MIN_DEGREE_EXPONENT};

/// A persistent vector with indexed access, append and pop.
#[derive(Clone, PartialEq)]
pub struct Vector<T> {
    length: usize,
    tail: Vec<T>,
    root: Option<Arc<VNode<T>>>,
    bits: usize,
    degree: usize,
    mask: usize,
    shift: usize,
}

impl<T> Vector<T> {
    /// An empty vector with the default trie degree (8).
    pub fn immutable() -> Self {
        Self::immutable_with_degree_exponent(DEFAULT_DEGREE_EXPONENT)
    }

    /// An empty vector whose trie degree is `2^n`. Exponents are clamped to
    /// `[1, 5]`, i.e. degrees 2 through 32.
    pub fn immutable_with_degree_exponent(n: usize) -> Self {
        let bits = n.clamp(MIN_DEGREE_EXPONENT, MAX_DEGREE_EXPONENT);
        Vector {
            length: 0,
            tail: Vec::new(),
            root: None,
            bits,
            degree: 1 << bits,
            mask: (1 << bits) - 1,
            shift: 0,
        }
    }

    /// Number of values in the vector.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The most recently pushed value, if any.
    pub fn last(&self) -> Option<&T> {
        self.tail.last()
    }

    /// Index of the first value held by the tail buffer.
    fn tail_offset(&self) -> usize {
        if self.length == 0 {
            0
        } else {
            (self.length - 1) & !self.mask
        }
    }

    fn with_parts(
        &self,
        length: usize,
        tail: Vec<T>,
        root: Option<Arc<VNode<T>>>,
        shift: usize,
    ) -> Self {
        Vector {
            length,
            tail,
            root,
            bits: self.bits,
            degree: self.degree,
            mask: self.mask,
            shift,
        }
    }

    /// The leaf holding index `i`, reached by consuming one index digit per
    /// trie level.
    fn leaf_at(&self, i: usize) -> Result<&VNode<T>> {
        let mut node = self
            .root
            .as_deref()
            .ok_or_else(|| eyre!("vector trie is missing its root"))?;
        let mut level = self.shift;
        while level > 0 {
            let slot = (i >> level) & self.mask;
            node = node
                .child(slot)
                .ok_or_else(|| eyre!("vector trie is missing a node at level {level}"))?
                .as_ref();
            level -= self.bits;
        }
        Ok(node)
    }

    /// The value at index `i`.
    pub fn get(&self, i: usize) -> Result<&T> {
        ensure!(
            i < self.length,
            "vector index out of bounds: {i} with length {}",
            self.length
        );
        if i >= self.tail_offset() {
            return self
                .tail
                .get(i & self.mask)
                .ok_or_else(|| eyre!("vector tail is missing slot {}", i & self.mask));
        }
        self.leaf_at(i)?
            .values()
            .get(i & self.mask)
            .ok_or_else(|| eyre!("vector leaf is missing slot {}", i & self.mask))
    }
}

impl<T: Clone> Vector<T> {
    /// A copy of the vector with the value at `i` replaced.
    pub fn set(&self, i: usize, value: T) -> Result<Self> {
        ensure!(
            i < self.length,
            "vector index out of bounds: {i} with length {}",
            self.length
        );
        if i >= self.tail_offset() {
            let mut tail = self.tail.clone();
            tail[i & self.mask] = value;
            return Ok(self.with_parts(self.length, tail, self.root.clone(), self.shift));
        }
        let root = self
            .root
            .as_deref()
            .ok_or_else(|| eyre!("vector trie is missing its root"))?;
        let root = self.set_below(root, self.shift, i, value)?;
        Ok(self.with_parts(self.length, self.tail.clone(), Some(Arc::new(root)), self.shift))
    }

    /// Copy-on-write descent for [`set`](Vector::set): clones every node
    /// along the path and writes into the cloned leaf.
    fn set_below(&self, node: &VNode<T>, level: usize, i: usize, value: T) -> Result<VNode<T>> {
        let mut cow = node.clone_node();
        if level == 0 {
            match &mut cow {
                VNode::Leaf(values) => {
                    let slot = i & self.mask;
                    ensure!(slot < values.len(), "vector leaf is missing slot {slot}");
                    values[slot] = value;
                }
                VNode::Branch(_) => eyre::bail!("vector trie ends in a branch"),
            }
            return Ok(cow);
        }
        let slot = (i >> level) & self.mask;
        let child = node
            .child(slot)
            .ok_or_else(|| eyre!("vector trie is missing a node at level {level}"))?;
        let child = self.set_below(child, level - self.bits, i, value)?;
        cow.set_child(slot, Some(Arc::new(child)));
        Ok(cow)
    }

    /// A copy of the vector with `value` appended.
    pub fn push(&self, value: T) -> Self {
        if self.tail.len() < self.degree {
            trace!(tail_len = self.tail.len(), "push: appending to the tail");
            let mut tail = Vec::with_capacity(self.degree);
            tail.extend_from_slice(&self.tail);
            tail.push(value);
            return self.with_parts(self.length + 1, tail, self.root.clone(), self.shift);
        }
        // the tail is full and migrates into the trie
        let tail = vec![value];
        debug_assert!(self.length >= self.degree);
        if self.length == self.degree {
            // the trie was empty: the old tail becomes the root leaf
            trace!("push: tail becomes the root leaf");
            let root = Arc::new(VNode::leaf_from(&self.tail));
            return self.with_parts(self.length + 1, tail, Some(root), 0);
        }
        if (self.length >> self.bits) > (1 << self.shift) {
            // the root is completely filled: grow the trie by one level
            trace!(shift = self.shift + self.bits, "push: growing the trie");
            let mut root = VNode::branch(self.degree);
            root.set_child(0, self.root.clone());
            root.set_child(1, Some(new_path(self.shift, self.bits, self.degree, &self.tail)));
            return self.with_parts(
                self.length + 1,
                tail,
                Some(Arc::new(root)),
                self.shift + self.bits,
            );
        }
        // still room below the root
        let root = match self.root.as_deref() {
            Some(root) => Arc::new(self.push_tail(root, self.shift, self.length - 1)),
            None => new_path(self.shift, self.bits, self.degree, &self.tail),
        };
        self.with_parts(self.length + 1, tail, Some(root), self.shift)
    }

    /// Copy-on-write descent installing the migrating tail as a leaf at the
    /// position of index `i` (the last value of the old tail). Vacant slots
    /// on the way down receive a fresh spine.
    fn push_tail(&self, node: &VNode<T>, level: usize, i: usize) -> VNode<T> {
        let mut cow = node.clone_node();
        let slot = (i >> level) & self.mask;
        let child = if level == self.bits {
            Arc::new(VNode::leaf_from(&self.tail))
        } else {
            match node.child(slot) {
                Some(child) => Arc::new(self.push_tail(child, level - self.bits, i)),
                None => new_path(level - self.bits, self.bits, self.degree, &self.tail),
            }
        };
        cow.set_child(slot, Some(child));
        cow
    }

    /// A copy of the vector with the last value removed. Fails on an empty
    /// vector.
    pub fn pop(&self) -> Result<Self> {
        ensure!(self.length > 0, "attempt to remove item from empty vector");
        if self.length == 1 {
            return Ok(self.with_parts(0, Vec::new(), None, 0));
        }
        if (self.length - 1) & self.mask > 0 {
            // the tail keeps at least one value
            let mut tail = Vec::with_capacity(self.degree);
            tail.extend_from_slice(&self.tail[..self.tail.len() - 1]);
            return Ok(self.with_parts(self.length - 1, tail, self.root.clone(), self.shift));
        }
        // the tail empties out and is repopulated from the trie
        let root = self
            .root
            .as_deref()
            .ok_or_else(|| eyre!("vector trie is missing its root"))?;
        let new_trie_size = self.length - self.degree - 1;
        if new_trie_size == 0 {
            // the root leaf vanishes into the tail
            ensure!(root.is_leaf(), "single-leaf trie expected a leaf root");
            trace!("pop: root leaf becomes the tail");
            return Ok(self.with_parts(self.length - 1, root.values().to_vec(), None, 0));
        }
        if new_trie_size == 1 << self.shift {
            // dropping one leaf empties a full level
            trace!(shift = self.shift - self.bits, "pop: lowering the trie");
            let new_root = root
                .child(0)
                .ok_or_else(|| eyre!("vector trie is missing its left subtree"))?
                .clone();
            let tail = self.leaf_at(new_trie_size)?.values().to_vec();
            return Ok(self.with_parts(
                self.length - 1,
                tail,
                Some(new_root),
                self.shift - self.bits,
            ));
        }
        let tail = self.leaf_at(new_trie_size)?.values().to_vec();
        let root = self.pop_path(root, self.shift, new_trie_size)?;
        Ok(self.with_parts(self.length - 1, tail, root, self.shift))
    }

    /// Copy-on-write descent isolating the leaf at `new_trie_size`: clones
    /// ancestors down to the divergence point and empties the slot whose
    /// subtree held nothing but the dropped leaf.
    fn pop_path(
        &self,
        node: &VNode<T>,
        level: usize,
        new_trie_size: usize,
    ) -> Result<Option<Arc<VNode<T>>>> {
        if level == 0 {
            return Ok(None); // the dropped leaf itself
        }
        let slot = (new_trie_size >> level) & self.mask;
        let mut cow = node.clone_node();
        if new_trie_size & ((1 << level) - 1) == 0 {
            // the subtree below holds only the dropped leaf
            cow.set_child(slot, None);
        } else {
            let child = node
                .child(slot)
                .ok_or_else(|| eyre!("vector trie is missing a node at level {level}"))?;
            let sub = self.pop_path(child, level - self.bits, new_trie_size)?;
            cow.set_child(slot, sub);
        }
        Ok(Some(Arc::new(cow)))
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Vector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Vector(len={} bits={} shift={} tail={:?})",
            self.length, self.bits, self.shift, self.tail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_fills_tail_then_trie() {
        let mut v = Vector::immutable_with_degree_exponent(1); // degree 2
        for x in [77, 78, 79, 80, 81] {
            v = v.push(x);
        }
        assert_eq!(v.len(), 5);
        assert_eq!(v.get(2).unwrap(), &79);
        assert_eq!(v.tail.len(), 1);
        assert_eq!(v.last(), Some(&81));
    }

    #[test]
    fn pop_repopulates_the_tail_from_the_trie() {
        let mut v = Vector::immutable_with_degree_exponent(1);
        for x in [77, 78, 79, 80, 81] {
            v = v.push(x);
        }
        let v = v.pop().unwrap();
        assert_eq!(v.len(), 4);
        assert_eq!(v.tail.len(), 2);
        assert_eq!(v.last(), Some(&80));
    }

    #[test]
    fn push_then_pop_restores_the_vector() {
        let mut v = Vector::immutable_with_degree_exponent(1);
        for x in 0..13 {
            v = v.push(x);
            let roundtrip = v.push(99).pop().unwrap();
            assert_eq!(roundtrip, v, "push/pop at length {}", v.len());
        }
    }

    #[test]
    fn get_reads_every_position() {
        let mut v = Vector::immutable_with_degree_exponent(1);
        for x in 0..100 {
            v = v.push(x);
        }
        for i in 0..100 {
            assert_eq!(v.get(i).unwrap(), &i, "index {i}");
        }
    }

    #[test]
    fn default_degree_walks_deep_tries_too() {
        let mut v = Vector::immutable();
        for x in 0..1000 {
            v = v.push(x);
        }
        assert_eq!(v.len(), 1000);
        for i in (0..1000).step_by(37) {
            assert_eq!(v.get(i).unwrap(), &i);
        }
    }

    #[test]
    fn pop_drains_to_empty() {
        let mut v = Vector::immutable_with_degree_exponent(1);
        for x in 0..33 {
            v = v.push(x);
        }
        for expect in (0..33).rev() {
            assert_eq!(v.last(), Some(&expect));
            assert_eq!(v.len(), expect + 1);
            v = v.pop().unwrap();
            for i in 0..expect {
                assert_eq!(v.get(i).unwrap(), &i, "index {i} after popping to {expect}");
            }
        }
        assert!(v.is_empty());
        assert_eq!(v.last(), None);
    }

    #[test]
    fn set_replaces_in_tail_and_trie() {
        let mut v = Vector::immutable_with_degree_exponent(1);
        for x in 0..10 {
            v = v.push(x);
        }
        let w = v.set(9, 90).unwrap(); // tail position
        assert_eq!(w.get(9).unwrap(), &90);
        let w = w.set(2, 20).unwrap(); // trie position
        assert_eq!(w.get(2).unwrap(), &20);
        for i in 0..10 {
            if i != 2 && i != 9 {
                assert_eq!(w.get(i).unwrap(), &i);
            }
        }
    }

    #[test]
    fn set_leaves_the_original_incarnation_alone() {
        let mut v = Vector::immutable_with_degree_exponent(1);
        for x in 0..10 {
            v = v.push(x);
        }
        let w = v.set(3, 33).unwrap();
        assert_eq!(v.get(3).unwrap(), &3, "original untouched");
        assert_eq!(w.get(3).unwrap(), &33);
    }

    #[test]
    fn index_law_holds_for_every_position() {
        let mut v = Vector::immutable();
        for x in 0..50 {
            v = v.push(x);
        }
        for i in 0..50 {
            let w = v.set(i, 1000 + i).unwrap();
            assert_eq!(w.get(i).unwrap(), &(1000 + i));
        }
    }

    #[test]
    fn bounds_violations_are_errors() {
        let v: Vector<i32> = Vector::immutable();
        assert!(v.get(0).is_err());
        assert!(v.set(0, 1).is_err());
        assert!(v.pop().is_err());

        let v = v.push(1);
        assert!(v.get(1).is_err());
        assert!(v.set(1, 2).is_err());
    }

    #[test]
    fn degree_exponent_is_clamped() {
        let v: Vector<i32> = Vector::immutable_with_degree_exponent(0);
        assert_eq!(v.degree, 2);
        let v: Vector<i32> = Vector::immutable_with_degree_exponent(9);
        assert_eq!(v.degree, 32);
    }

    #[test]
    fn length_changes_by_one() {
        let v = Vector::immutable().push(1);
        assert_eq!(v.len(), 1);
        let w = v.push(2);
        assert_eq!(w.len(), 2);
        assert_eq!(w.pop().unwrap().len(), 1);
    }
}
