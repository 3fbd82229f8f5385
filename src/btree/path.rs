//! # Slots and Slot Paths
//!
//! For the operations on the persistent map we manage a path, consisting of
//! slots. A slot is a tree node together with an index into the items and
//! children held by that node.
//!
//! Example, given a tree
//!
//! ```text
//! Tree(depth=2 ⊥3 ⊤6)
//! .
//! └── [2,5]
//!     ├── [0,1]
//!     ├── [3,4]
//!     └── [6,8,9]
//! ```
//!
//! the key `8` in the rightmost leaf is reached through the path
//!
//! ```text
//! [  [2,5]:2   [6,8,9]:1  ]
//! ```
//!
//! A slot for a node with `n` items may carry an index in `0..=n`.
//!
//! ## The Right Fold
//!
//! Copy-on-write modifications clone the nodes along a root-to-leaf path
//! and splice the fresh child into the fresh parent at every level. That
//! pattern is captured once, as a right fold over the path with a binary
//! combinator `f(parent, child) -> new child of the level above`; the three
//! combinators in use are plain clone-seaming, split-and-clone (insertion)
//! and balance (deletion).

use std::sync::Arc;

use smallvec::SmallVec;

use super::node::BNode;

/// One step of a path: a node plus the index where the path continues.
pub(crate) struct Slot<K, V> {
    pub(crate) node: Arc<BNode<K, V>>,
    pub(crate) index: usize,
}

impl<K, V> Clone for Slot<K, V> {
    fn clone(&self) -> Self {
        Slot {
            node: self.node.clone(),
            index: self.index,
        }
    }
}

impl<K, V> Slot<K, V> {
    pub(crate) fn new(node: Arc<BNode<K, V>>, index: usize) -> Self {
        Slot { node, index }
    }

    /// Number of items in the slot's node.
    pub(crate) fn len(&self) -> usize {
        self.node.items.len()
    }

    /// The left sibling of the child this slot descends into, if any.
    pub(crate) fn left_sibling(&self) -> Option<Slot<K, V>> {
        if self.node.is_leaf() || self.index == 0 {
            return None;
        }
        let sibling = self.node.children[self.index - 1].clone();
        let index = sibling.items.len();
        Some(Slot::new(sibling, index))
    }

    /// The right sibling of the child this slot descends into, if any.
    pub(crate) fn right_sibling(&self) -> Option<Slot<K, V>> {
        if self.node.is_leaf() || self.index + 1 >= self.node.children.len() {
            return None;
        }
        let sibling = self.node.children[self.index + 1].clone();
        let index = sibling.items.len();
        Some(Slot::new(sibling, index))
    }
}

/// A root-to-target list of slots. Depth is almost always small, so the
/// slots live inline.
pub(crate) type SlotPath<K, V> = SmallVec<[Slot<K, V>; 8]>;

/// Applies `f` on `(parent, child)` slot pairs, starting from the right,
/// the bottom-most slot of the path, usually a leaf. `zero` seeds the
/// rightmost call; the value of the final call (the new root slot) is
/// returned, or `zero` itself for an empty path.
pub(crate) fn fold_r<K, V>(
    path: &[Slot<K, V>],
    f: impl Fn(&Slot<K, V>, Slot<K, V>) -> Slot<K, V>,
    zero: Slot<K, V>,
) -> Slot<K, V> {
    path.iter().rev().fold(zero, |child, parent| f(parent, child))
}
