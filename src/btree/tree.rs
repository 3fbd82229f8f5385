//! # Persistent Ordered Map
//!
//! An in-memory B-tree with copy-on-write modification. Every mutating
//! operation returns a new incarnation of the tree; all incarnations share
//! the nodes not touched by the modification.
//!
//! ```text
//!        t              t.with(9, …)
//!        │                  │
//!      [2,5]              [2,5]'          ← cloned spine
//!     ／  │  ＼          ／  │   ＼
//! [0,1] [3,4] [6,8]─────────────[6,8,9]'
//!    ▲      ▲
//!    └──────┴── shared between both incarnations
//! ```
//!
//! ## Re-Balancing
//!
//! Re-balancing is reactive, never proactive: a modification first lands in
//! the target leaf, then a right fold over the recorded root-to-leaf path
//! repairs any violated bound while it clones the spine.
//!
//! - Insertion folds with *split-and-clone*: an overfull child is split
//!   around its median, which moves up into the (cloned) parent.
//! - Deletion folds with *balance*: an underfull child steals an item from
//!   a sibling via rotation, or gets merged with a sibling around the
//!   separating parent item.
//!
//! Deleting inside an internal node first swaps the in-order successor or
//! predecessor into the vacated slot (preferring the donor leaf that sits
//! above the low water mark), then continues as a leaf deletion along the
//! donor path.
//!
//! ## Water Marks
//!
//! Every non-root node keeps `low_water <= items.len() <= high_water` with
//! `high_water = ceiling(low_water · 2) − 2`. The root may hold any count
//! from 1 up to the high water mark.
//!
//! ## Thread Safety
//!
//! Incarnations are immutable; any number of threads may hold and read any
//! incarnation without locks.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use super::node::{BNode, Item};
use super::path::{fold_r, Slot, SlotPath};
use crate::config::{ceiling, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK};

/// A persistent ordered map. The empty value is a usable empty tree:
///
/// ```ignore
/// let tree = Tree::immutable().with(1, 42);
/// let (value, found) = (tree.find(&1), true);
/// ```
#[derive(PartialEq)]
pub struct Tree<K, V> {
    root: Option<Arc<BNode<K, V>>>,
    depth: usize,
    low_water: usize,
    high_water: usize,
}

impl<K, V> Clone for Tree<K, V> {
    fn clone(&self) -> Self {
        Tree {
            root: self.root.clone(),
            depth: self.depth,
            low_water: self.low_water,
            high_water: self.high_water,
        }
    }
}

impl<K, V> Default for Tree<K, V> {
    fn default() -> Self {
        Self::immutable()
    }
}

impl<K, V> Tree<K, V> {
    /// An empty tree with the default water marks.
    pub fn immutable() -> Self {
        Tree {
            root: None,
            depth: 0,
            low_water: DEFAULT_LOW_WATER_MARK,
            high_water: DEFAULT_HIGH_WATER_MARK,
        }
    }

    /// An empty tree where nodes own at least `degree` children. The low
    /// water mark becomes `max(2, degree − 1)`; the high water mark is
    /// derived from it.
    pub fn immutable_with_degree(degree: usize) -> Self {
        let low_water = degree.saturating_sub(1).max(2);
        Tree {
            root: None,
            depth: 0,
            low_water,
            high_water: ceiling(low_water * 2) - 2,
        }
    }

    fn with_root(&self, root: Option<Arc<BNode<K, V>>>, depth: usize) -> Self {
        Tree {
            root,
            depth,
            low_water: self.low_water,
            high_water: self.high_water,
        }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> Tree<K, V> {
    /// Locates `key`, returning the associated value if present.
    pub fn find(&self, key: &K) -> Option<&V> {
        let mut node = self.root.as_deref()?;
        loop {
            let (found, index) = node.find_slot(key);
            if found {
                return Some(&node.items[index].value);
            }
            if node.is_leaf() {
                return None;
            }
            node = node.children[index].as_ref();
        }
    }

    /// A copy of the tree with `key` associated to `value`. An entry already
    /// present gets its value replaced (in a new incarnation); inserting an
    /// identical key/value pair returns the tree unchanged.
    pub fn with(&self, key: K, value: V) -> Self {
        let (found, path) = self.find_key_and_path(&key);
        if found {
            let Some((hit, _)) = path.split_last() else {
                return self.clone();
            };
            if hit.node.items[hit.index].value == value {
                return self.clone(); // no need for modification
            }
            return self.replacing(key, value, &path);
        }
        let item = Item { key, value };
        if self.root.is_none() {
            // virgin tree
            let root = BNode::empty().with_inserted_item(item, 0);
            return self.with_root(Some(Arc::new(root)), 1);
        }
        let Some((leaf_slot, spine)) = path.split_last() else {
            return self.clone();
        };
        debug_assert!(leaf_slot.node.is_leaf(), "insertion lands at a leaf");
        let cow = leaf_slot.node.with_inserted_item(item, leaf_slot.index);
        trace!(at = leaf_slot.index, "insert: created copy of leaf");
        let top = fold_r(spine, split_and_clone(self.high_water), Slot::new(Arc::new(cow), leaf_slot.index));
        if top.node.overfull(self.high_water) {
            debug!("insert: splitting the root");
            let top = split_child(&BNode::empty(), &top);
            return self.with_root(Some(top.node), self.depth + 1);
        }
        self.with_root(Some(top.node), self.depth)
    }

    /// A copy of the tree with `key` deleted, if present. Without the key
    /// the tree is returned unchanged.
    pub fn with_deleted(&self, key: &K) -> Self {
        let (found, mut path) = self.find_key_and_path(key);
        if !found {
            return self.clone(); // no need for modification
        }
        let Some(hit) = path.last().cloned() else {
            return self.clone();
        };
        if !hit.node.is_leaf() {
            // swap the in-order successor or predecessor into the vacated
            // slot, then delete it from its donor leaf
            let hit_pos = path.len() - 1;
            let donor = self.steal_pred_or_succ(&hit, &mut path);
            let cow_hit = hit.node.with_swapped_item(donor, hit.index);
            let descent = path[hit_pos].index;
            path[hit_pos] = Slot::new(Arc::new(cow_hit), descent);
        }
        let Some((leaf_slot, spine)) = path.split_last() else {
            return self.clone();
        };
        let cow_leaf = leaf_slot.node.with_deleted_item(leaf_slot.index);
        let top = fold_r(spine, balance(self.low_water), Slot::new(Arc::new(cow_leaf), leaf_slot.index));
        if top.node.items.is_empty() {
            // the root emptied out
            if let Some(only_child) = top.node.children.first() {
                debug!("delete: lowering the root");
                return self.with_root(Some(only_child.clone()), self.depth - 1);
            }
            return self.with_root(None, 0);
        }
        self.with_root(Some(top.node), self.depth)
    }

    /// Tracks the path from the root to the slot of `key` (or to the leaf
    /// slot where it would live).
    fn find_key_and_path(&self, key: &K) -> (bool, SlotPath<K, V>) {
        let mut path = SlotPath::new();
        let Some(root) = &self.root else {
            return (false, path);
        };
        let mut node = root.clone();
        loop {
            let (found, index) = node.find_slot(key);
            path.push(Slot::new(node.clone(), index));
            if found {
                return (true, path);
            }
            if node.is_leaf() {
                return (false, path);
            }
            let next = node.children[index].clone();
            node = next;
        }
    }

    fn replacing(&self, key: K, value: V, path: &[Slot<K, V>]) -> Self {
        let Some((hit, spine)) = path.split_last() else {
            return self.clone();
        };
        let cow = hit.node.with_replaced_value(Item { key, value }, hit.index);
        let top = fold_r(spine, clone_seam, Slot::new(Arc::new(cow), hit.index));
        self.with_root(Some(top.node), self.depth)
    }

    /// Extends `path` below the inner slot `hit` down to a donor leaf
    /// holding the in-order successor or predecessor of the hit item,
    /// preferring the successor when its leaf sits above the low water mark.
    /// Returns the donor item; `path` afterwards leads to the donor slot.
    fn steal_pred_or_succ(&self, hit: &Slot<K, V>, path: &mut SlotPath<K, V>) -> Item<K, V> {
        let hit_pos = path.len() - 1;
        let mark = path.len();
        find_succ(hit, path);
        let succ_is_safe = path
            .last()
            .map_or(false, |leaf| leaf.len() > self.low_water);
        if succ_is_safe {
            // descend right of the hit item for the fold
            path[hit_pos].index += 1;
        } else {
            path.truncate(mark);
            find_pred(hit, path);
        }
        let donor = &path[path.len() - 1];
        trace!(index = donor.index, "delete: donor slot located");
        donor.node.items[donor.index].clone()
    }
}

/// Appends the path to the smallest key of the subtree right of `hit`.
fn find_succ<K, V>(hit: &Slot<K, V>, path: &mut SlotPath<K, V>) {
    let mut node = hit.node.children[hit.index + 1].clone();
    while !node.is_leaf() {
        path.push(Slot::new(node.clone(), 0));
        let next = node.children[0].clone();
        node = next;
    }
    path.push(Slot::new(node, 0));
}

/// Appends the path to the largest key of the subtree left of `hit`.
fn find_pred<K, V>(hit: &Slot<K, V>, path: &mut SlotPath<K, V>) {
    let mut node = hit.node.children[hit.index].clone();
    while !node.is_leaf() {
        let last = node.items.len();
        path.push(Slot::new(node.clone(), last));
        let next = node.children[last].clone();
        node = next;
    }
    let last = node.items.len() - 1;
    path.push(Slot::new(node, last));
}

// --- Splitting and balancing -----------------------------------------------

/// Clones the parent with the fresh child spliced in at the descent index.
/// The seam every fold combinator falls back to.
fn clone_seam<K: Ord + Clone, V: Clone>(parent: &Slot<K, V>, child: Slot<K, V>) -> Slot<K, V> {
    let mut cow = parent.node.clone_node();
    cow.children[parent.index] = child.node;
    Slot::new(Arc::new(cow), parent.index)
}

/// Fold combinator for insertion: splits an overfull child around its
/// median, otherwise clone-seams.
fn split_and_clone<K: Ord + Clone, V: Clone>(
    high_water: usize,
) -> impl Fn(&Slot<K, V>, Slot<K, V>) -> Slot<K, V> {
    move |parent, child| {
        if child.node.overfull(high_water) {
            trace!(len = child.len(), "insert: child is overfull");
            return split_child(parent.node.as_ref(), &child);
        }
        clone_seam(parent, child)
    }
}

/// Splits the overfull `child` around its median item. Returns a copy of
/// `parent` where the median moved in and the two halves replace the child.
/// Passing an empty node as `parent` creates a fresh root.
fn split_child<K: Ord + Clone, V: Clone>(parent: &BNode<K, V>, child: &Slot<K, V>) -> Slot<K, V> {
    let half = child.len() / 2;
    let mid = child.node.items[half].clone();
    let left = Arc::new(child.node.slice(0, half));
    let right = Arc::new(child.node.slice(half + 1, child.len()));
    let (found, index) = parent.find_slot(&mid.key);
    debug_assert!(!found, "child shares a key with its parent");
    debug!(half, at = index, "split: median moves into the parent");

    let mut items = Vec::with_capacity(ceiling(parent.items.len() + 1));
    items.extend_from_slice(&parent.items[..index]);
    items.push(mid);
    items.extend_from_slice(&parent.items[index..]);
    let mut children = Vec::with_capacity(ceiling(parent.items.len() + 1));
    if parent.is_leaf() {
        // a fresh root over the two halves
        children.push(left);
        children.push(right);
    } else {
        children.extend_from_slice(&parent.children[..index]);
        children.push(left);
        children.push(right);
        children.extend_from_slice(&parent.children[index + 1..]);
    }
    Slot::new(Arc::new(BNode { items, children }), index)
}

/// Fold combinator for deletion: repairs an underfull child through its
/// parent, otherwise clone-seams.
fn balance<K: Ord + Clone, V: Clone>(
    low_water: usize,
) -> impl Fn(&Slot<K, V>, Slot<K, V>) -> Slot<K, V> {
    move |parent, child| {
        if child.node.underfull(low_water) {
            trace!(len = child.len(), "delete: child is underfull");
            return rebalance(parent, child, low_water);
        }
        clone_seam(parent, child)
    }
}

fn rebalance<K: Ord + Clone, V: Clone>(
    parent: &Slot<K, V>,
    child: Slot<K, V>,
    low_water: usize,
) -> Slot<K, V> {
    if let Some(left) = parent.left_sibling() {
        if left.len() > low_water {
            // steal an item from the left sibling
            return rotate_right(parent, &left, &child);
        }
    }
    if let Some(right) = parent.right_sibling() {
        if right.len() > low_water {
            // steal an item from the right sibling
            return rotate_left(parent, &child, &right);
        }
    }
    // steal an item from the parent and merge with a sibling
    merge(parent, child)
}

/// Right rotation: the left sibling's last item moves up into the parent,
/// the parent's separator moves down as the first item of the underfull
/// child. For internal nodes the sibling's rightmost child link migrates
/// along.
fn rotate_right<K: Ord + Clone, V: Clone>(
    parent: &Slot<K, V>,
    left: &Slot<K, V>,
    child: &Slot<K, V>,
) -> Slot<K, V> {
    debug_assert!(parent.index > 0, "no separator left of the first child");
    let sep = parent.index - 1;
    debug!(sep, "delete: rotating right");
    let (cow_left, stolen, grandchild) = left.node.with_cut_right();
    let mut cow_parent = parent.node.clone_node();
    let down = std::mem::replace(&mut cow_parent.items[sep], stolen);
    let cow_child = child.node.with_item_pushed_front(down, grandchild);
    cow_parent.children[sep] = Arc::new(cow_left);
    cow_parent.children[parent.index] = Arc::new(cow_child);
    Slot::new(Arc::new(cow_parent), parent.index)
}

/// Left rotation, symmetric to [`rotate_right`].
fn rotate_left<K: Ord + Clone, V: Clone>(
    parent: &Slot<K, V>,
    child: &Slot<K, V>,
    right: &Slot<K, V>,
) -> Slot<K, V> {
    let sep = parent.index;
    debug!(sep, "delete: rotating left");
    let (cow_right, stolen, grandchild) = right.node.with_cut_left();
    let mut cow_parent = parent.node.clone_node();
    let down = std::mem::replace(&mut cow_parent.items[sep], stolen);
    let cow_child = child.node.with_item_pushed_back(down, grandchild);
    cow_parent.children[sep] = Arc::new(cow_child);
    cow_parent.children[sep + 1] = Arc::new(cow_right);
    Slot::new(Arc::new(cow_parent), parent.index)
}

/// Merges the underfull child with a sibling: the separating item is pulled
/// down from the parent and, combined with the two siblings' items (and
/// children, for internal nodes), forms a single child. The parent loses
/// one item and one child link and may itself become underfull.
fn merge<K: Ord + Clone, V: Clone>(parent: &Slot<K, V>, child: Slot<K, V>) -> Slot<K, V> {
    // prefer the left sibling; every internal node on the path has one
    // neighbor for each child
    let (sep, left, right) = match parent.left_sibling() {
        Some(left) => (parent.index - 1, left, child),
        None => match parent.right_sibling() {
            Some(right) => (parent.index, child, right),
            None => return clone_seam(parent, child),
        },
    };
    debug!(sep, "delete: merging siblings");
    let sep_item = parent.node.items[sep].clone();
    let mut cow_parent = parent.node.with_deleted_item(sep);
    let mut merged = left.node.clone_with_capacity(left.len() + right.len() + 1);
    merged.items.push(sep_item);
    merged.items.extend_from_slice(&right.node.items);
    if !merged.is_leaf() {
        merged.children.extend_from_slice(&right.node.children);
    }
    cow_parent.children[sep] = Arc::new(merged);
    Slot::new(Arc::new(cow_parent), sep)
}

impl<K: fmt::Debug, V> fmt::Debug for Tree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tree(depth={} ⊥{} ⊤{})",
            self.depth, self.low_water, self.high_water
        )
    }
}
