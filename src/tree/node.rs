//! # Mutable Tree Nodes
//!
//! This module implements the mutable tree the walker operates on. Nodes
//! carry a client payload, a rank used as an ordering hint, a back-link to
//! their parent and a lock-protected vector of children.
//!
//! ## Child Vector
//!
//! Children are position-significant: `set_child_at` extends the vector with
//! empty slots as needed, and `isolate` empties a slot without shrinking the
//! vector. Readers therefore see a stable indexing scheme while siblings come
//! and go.
//!
//! ```text
//! (parent)
//!   children: [ Some(a), None, Some(b), None, Some(c) ]
//!                 0       1      2       3      4
//! ```
//!
//! ## Ownership
//!
//! The tree owns its nodes top-down through `Arc` child references; the
//! parent link is a `Weak` back-reference. Dropping the root releases the
//! whole tree. Node identity is `Arc` pointer identity.
//!
//! ## Thread Safety
//!
//! All child-vector accesses go through a `parking_lot::RwLock`, so nodes can
//! be shared freely across the pipeline's worker threads. The rank is an
//! atomic and may be updated concurrently by mutating filter actions.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Shared handle to a tree node. Node identity is pointer identity.
pub type NodeRef<T> = Arc<Node<T>>;

/// The base type trees are built of.
pub struct Node<T> {
    payload: T,
    rank: AtomicU32,
    me: Weak<Node<T>>,
    parent: RwLock<Weak<Node<T>>>,
    children: RwLock<Vec<Option<NodeRef<T>>>>,
}

impl<T> Node<T> {
    /// Creates a new, unconnected tree node with the given payload.
    pub fn new(payload: T) -> NodeRef<T> {
        Arc::new_cyclic(|me| Node {
            payload,
            rank: AtomicU32::new(0),
            me: me.clone(),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
        })
    }

    /// The payload this node carries.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The rank of this node. Zero means unset; after a rank calculation it
    /// equals the number of nodes in the subtree rooted here.
    pub fn rank(&self) -> u32 {
        self.rank.load(Ordering::Relaxed)
    }

    /// Sets the rank of this node.
    pub fn set_rank(&self, rank: u32) {
        self.rank.store(rank, Ordering::Relaxed);
    }

    /// Returns the parent node, or `None` for the root of a tree.
    pub fn parent(&self) -> Option<NodeRef<T>> {
        self.parent.read().upgrade()
    }

    /// Appends a child node. The child is connected to this node as its
    /// parent. Returns `self` to allow for chaining.
    ///
    /// This operation is concurrency-safe.
    pub fn add_child(&self, child: &NodeRef<T>) -> &Self {
        let mut children = self.children.write();
        children.push(Some(child.clone()));
        *child.parent.write() = self.me.clone();
        self
    }

    /// Places a child at position `i`, extending the child vector with empty
    /// slots if needed and overwriting any child already at `i`. The child is
    /// connected to this node as its parent. Returns `self` for chaining.
    ///
    /// This operation is concurrency-safe.
    pub fn set_child_at(&self, i: usize, child: &NodeRef<T>) -> &Self {
        let mut children = self.children.write();
        if children.len() <= i {
            children.resize(i + 1, None);
        }
        children[i] = Some(child.clone());
        *child.parent.write() = self.me.clone();
        self
    }

    /// Inserts a child at position `i`, shifting children at later positions
    /// to the right. Positions past the current end behave like
    /// [`set_child_at`](Node::set_child_at). Returns `self` for chaining.
    ///
    /// This operation is concurrency-safe.
    pub fn insert_child_at(&self, i: usize, child: &NodeRef<T>) -> &Self {
        let mut children = self.children.write();
        if children.len() <= i {
            children.resize(i + 1, None);
            children[i] = Some(child.clone());
        } else {
            children.insert(i, Some(child.clone()));
        }
        *child.parent.write() = self.me.clone();
        self
    }

    /// Removes this node from its parent. The vacated slot becomes empty; the
    /// sibling positions do not shift.
    pub fn isolate(&self) {
        let Some(parent) = self.parent() else { return };
        let mut children = parent.children.write();
        for slot in children.iter_mut() {
            if let Some(ch) = slot {
                if std::ptr::eq(Arc::as_ptr(ch), self) {
                    *slot = None;
                    *self.parent.write() = Weak::new();
                    break;
                }
            }
        }
    }

    /// The number of child slots of this node, empty slots included
    /// (concurrency-safe).
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Returns the child at position `n`, if the slot exists and is occupied.
    pub fn child(&self, n: usize) -> Option<NodeRef<T>> {
        self.children.read().get(n).cloned().flatten()
    }

    /// Snapshot of all children, skipping empty slots.
    pub fn children(&self) -> Vec<NodeRef<T>> {
        self.children.read().iter().flatten().cloned().collect()
    }

    /// Position-preserving snapshot of the child vector, empty slots
    /// included.
    pub fn child_slots(&self) -> Vec<Option<NodeRef<T>>> {
        self.children.read().clone()
    }

    /// Returns the slot index of `child` within this node's children, or
    /// `None` if `child` is not attached here.
    pub fn index_of(&self, child: &NodeRef<T>) -> Option<usize> {
        self.children
            .read()
            .iter()
            .position(|slot| matches!(slot, Some(ch) if Arc::ptr_eq(ch, child)))
    }
}

impl<T: fmt::Debug> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Node #ch={} {:?})", self.child_count(), self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_set_and_insert_children() {
        let parent = Node::new(-1);
        parent.add_child(&Node::new(0)).add_child(&Node::new(1));

        let ch4 = Node::new(4);
        parent.set_child_at(4, &ch4);
        let ch = parent.child(4).expect("child at position 4");
        assert!(Arc::ptr_eq(&ch, &ch4));
        assert!(parent.child(2).is_none(), "gap slots stay empty");

        let ch3 = Node::new(3);
        parent.insert_child_at(1, &ch3);
        let ch = parent.child(1).expect("child at position 1");
        assert!(Arc::ptr_eq(&ch, &ch3));
        let ch = parent.child(5).expect("shifted child at position 5");
        assert!(Arc::ptr_eq(&ch, &ch4));
    }

    #[test]
    fn parent_links_follow_attachment() {
        let a = Node::new(1);
        let b = Node::new(2);
        a.add_child(&b);
        assert!(Arc::ptr_eq(&b.parent().unwrap(), &a));
        assert!(a.parent().is_none());
        assert_eq!(a.index_of(&b), Some(0));
    }

    #[test]
    fn isolate_vacates_the_slot() {
        let root = Node::new(0);
        let a = Node::new(1);
        let b = Node::new(2);
        root.add_child(&a).add_child(&b);

        a.isolate();
        assert!(a.parent().is_none());
        assert!(root.child(0).is_none());
        assert_eq!(root.child_count(), 2, "slot count unchanged");
        let b_again = root.child(1).unwrap();
        assert!(Arc::ptr_eq(&b_again, &b));
        assert_eq!(root.index_of(&a), None);
    }

    #[test]
    fn children_snapshot_skips_gaps() {
        let root = Node::new(0);
        let a = Node::new(1);
        root.set_child_at(3, &a);
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.child_slots().len(), 4);
    }

    #[test]
    fn rank_defaults_to_unset() {
        let n = Node::new(7);
        assert_eq!(n.rank(), 0);
        n.set_rank(3);
        assert_eq!(n.rank(), 3);
    }

    #[test]
    fn out_of_range_child_is_absent() {
        let n = Node::new(0);
        assert!(n.child(0).is_none());
        assert!(n.child(99).is_none());
    }
}
