//! # B-Tree Node Internals
//!
//! Nodes of the persistent ordered map. A node holds a sorted list of
//! key/value items; internal nodes additionally hold `items + 1` child
//! references. Leafs have an empty child list.
//!
//! ## Copy-on-Write Primitives
//!
//! Every modification returns a fresh copy of the node; the original is
//! never touched. `cow` is used throughout the code for variables holding
//! such copies. The primitives are
//!
//! - replacement of a value,
//! - deletion of an item (dropping the left child link on internal nodes),
//! - insertion of an item into a leaf,
//! - cutting the left- or rightmost item off (for rotations),
//! - pushing an item onto the front or back (the receiving side of a
//!   rotation),
//! - slicing out a half (for splits).
//!
//! Children are shared between node incarnations through `Arc` references,
//! so a copy is shallow: one item vector and one child vector.
//!
//! ## Capacity Policy
//!
//! Item allocations use the power-of-two [`ceiling`] of the required length,
//! keeping headroom of at least two beyond the current count.

use std::fmt;
use std::sync::Arc;

use crate::config::ceiling;

/// A key/value entry of the map.
#[derive(Clone, PartialEq)]
pub(crate) struct Item<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
}

/// A tree node, either an internal node or a leaf. For leafs, `children` is
/// empty; for internal nodes `children.len() == items.len() + 1`.
#[derive(PartialEq)]
pub(crate) struct BNode<K, V> {
    pub(crate) items: Vec<Item<K, V>>,
    pub(crate) children: Vec<Arc<BNode<K, V>>>,
}

impl<K, V> BNode<K, V> {
    pub(crate) fn empty() -> Self {
        BNode {
            items: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn overfull(&self, high_water: usize) -> bool {
        self.items.len() > high_water
    }

    pub(crate) fn underfull(&self, low_water: usize) -> bool {
        self.items.len() < low_water
    }
}

impl<K: Ord + Clone, V: Clone> BNode<K, V> {
    /// Searches `key` within the items of this node. Returns the slot index
    /// for the key and whether it is an exact match. Without a match the
    /// index denotes the child to descend into (equally: the insertion
    /// point).
    pub(crate) fn find_slot(&self, key: &K) -> (bool, usize) {
        match self.items.binary_search_by(|item| item.key.cmp(key)) {
            Ok(index) => (true, index),
            Err(index) => (false, index),
        }
    }

    pub(crate) fn clone_node(&self) -> Self {
        self.clone_with_capacity(0)
    }

    /// Copy of this node with item capacity for at least `cap` entries
    /// (rounded up by the capacity ceiling).
    pub(crate) fn clone_with_capacity(&self, cap: usize) -> Self {
        let cap = ceiling(cap.max(self.items.len()));
        let mut items = Vec::with_capacity(cap);
        items.extend_from_slice(&self.items);
        let mut children = Vec::with_capacity(if self.is_leaf() { 0 } else { cap });
        children.extend_from_slice(&self.children);
        BNode { items, children }
    }

    /// Copy with the value at `at` replaced. The key must stay the same.
    pub(crate) fn with_replaced_value(&self, item: Item<K, V>, at: usize) -> Self {
        debug_assert!(at < self.items.len(), "item index out of range");
        debug_assert!(item.key == self.items[at].key, "replacing value for a different key");
        let mut cow = self.clone_node();
        cow.items[at].value = item.value;
        cow
    }

    /// Copy with the item at `at` swapped for `item`, key included. Used to
    /// move a donor item into the slot of a deleted inner item.
    pub(crate) fn with_swapped_item(&self, item: Item<K, V>, at: usize) -> Self {
        debug_assert!(at < self.items.len(), "item index out of range");
        let mut cow = self.clone_node();
        cow.items[at] = item;
        cow
    }

    /// Copy with the item at `at` removed. On internal nodes the child link
    /// left of the item is dropped as well.
    pub(crate) fn with_deleted_item(&self, at: usize) -> Self {
        debug_assert!(at < self.items.len(), "item index out of range");
        let mut cow = self.clone_node();
        cow.items.remove(at);
        if !cow.is_leaf() {
            cow.children.remove(at);
        }
        cow
    }

    /// Copy with a new item inserted at index `at`. Leafs only; internal
    /// nodes are restructured through splits and rotations instead.
    pub(crate) fn with_inserted_item(&self, item: Item<K, V>, at: usize) -> Self {
        debug_assert!(self.is_leaf(), "item insertion happens at leafs");
        debug_assert!(at <= self.items.len(), "item index out of range");
        let mut cow = self.clone_with_capacity(self.items.len() + 1);
        cow.items.insert(at, item);
        cow
    }

    /// Copy with the rightmost item cut off, returning the item and, for
    /// internal nodes, the rightmost child.
    pub(crate) fn with_cut_right(&self) -> (Self, Item<K, V>, Option<Arc<BNode<K, V>>>) {
        debug_assert!(!self.items.is_empty(), "cutting an item from an empty node");
        let mut cow = self.clone_node();
        let item = cow.items.remove(cow.items.len() - 1);
        let child = if cow.is_leaf() { None } else { cow.children.pop() };
        (cow, item, child)
    }

    /// Copy with the leftmost item cut off, returning the item and, for
    /// internal nodes, the leftmost child.
    pub(crate) fn with_cut_left(&self) -> (Self, Item<K, V>, Option<Arc<BNode<K, V>>>) {
        debug_assert!(!self.items.is_empty(), "cutting an item from an empty node");
        let mut cow = self.clone_node();
        let item = cow.items.remove(0);
        let child = if cow.is_leaf() { None } else { Some(cow.children.remove(0)) };
        (cow, item, child)
    }

    /// Copy with `item` as the new first item; for internal nodes `child`
    /// becomes the new leftmost child link.
    pub(crate) fn with_item_pushed_front(
        &self,
        item: Item<K, V>,
        child: Option<Arc<BNode<K, V>>>,
    ) -> Self {
        let mut cow = self.clone_with_capacity(self.items.len() + 1);
        cow.items.insert(0, item);
        if let Some(child) = child {
            cow.children.insert(0, child);
        }
        cow
    }

    /// Copy with `item` as the new last item; for internal nodes `child`
    /// becomes the new rightmost child link.
    pub(crate) fn with_item_pushed_back(
        &self,
        item: Item<K, V>,
        child: Option<Arc<BNode<K, V>>>,
    ) -> Self {
        let mut cow = self.clone_with_capacity(self.items.len() + 1);
        cow.items.push(item);
        if let Some(child) = child {
            cow.children.push(child);
        }
        cow
    }

    /// The half-open item range `from..to`, together with the child links
    /// spanning it (`from..=to`) for internal nodes. Used to carve the two
    /// halves out of an overfull node.
    pub(crate) fn slice(&self, from: usize, to: usize) -> Self {
        if to <= from {
            return BNode::empty();
        }
        let size = to - from;
        let mut items = Vec::with_capacity(ceiling(size));
        items.extend_from_slice(&self.items[from..to]);
        let mut children = Vec::new();
        if !self.is_leaf() {
            children.reserve(ceiling(size));
            children.extend_from_slice(&self.children[from..=to]);
        }
        BNode { items, children }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for BNode<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{:?}", item.key)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[i32]) -> BNode<i32, String> {
        BNode {
            items: keys
                .iter()
                .map(|&k| Item {
                    key: k,
                    value: k.to_string(),
                })
                .collect(),
            children: Vec::new(),
        }
    }

    #[test]
    fn find_slot_hits_and_misses() {
        let node = leaf(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(node.find_slot(&7), (true, 6));

        let node = leaf(&[1, 2, 3, 4, 5, 6, 8, 9]);
        assert_eq!(node.find_slot(&7), (false, 6));

        let node = leaf(&[]);
        assert_eq!(node.find_slot(&7), (false, 0));

        let node = leaf(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(node.find_slot(&7), (false, 6), "insertion point past the end");
    }

    #[test]
    fn inserted_item_keeps_order() {
        let node = leaf(&[1, 3]);
        let cow = node.with_inserted_item(
            Item {
                key: 2,
                value: "2".into(),
            },
            1,
        );
        let keys: Vec<i32> = cow.items.iter().map(|i| i.key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(node.items.len(), 2, "original untouched");
    }

    #[test]
    fn clone_capacity_uses_the_ceiling() {
        let node = leaf(&[1, 2, 3]);
        let cow = node.clone_with_capacity(4);
        assert_eq!(cow.items.len(), 3);
        assert!(cow.items.capacity() >= 8, "ceiling(4) = 8");
    }

    #[test]
    fn cut_right_and_left() {
        let node = leaf(&[1, 2, 3]);
        let (cow, item, child) = node.with_cut_right();
        assert_eq!(item.key, 3);
        assert!(child.is_none());
        assert_eq!(cow.items.len(), 2);

        let (cow, item, child) = node.with_cut_left();
        assert_eq!(item.key, 1);
        assert!(child.is_none());
        assert_eq!(cow.items.len(), 2);
    }

    #[test]
    fn deleted_item_drops_left_child_link() {
        let internal: BNode<i32, String> = BNode {
            items: vec![
                Item { key: 2, value: "2".into() },
                Item { key: 5, value: "5".into() },
            ],
            children: vec![
                Arc::new(leaf(&[0, 1])),
                Arc::new(leaf(&[3, 4])),
                Arc::new(leaf(&[6, 8, 9])),
            ],
        };
        let cow = internal.with_deleted_item(1);
        assert_eq!(cow.items.len(), 1);
        assert_eq!(cow.children.len(), 2);
        assert_eq!(cow.children[1].items[0].key, 6, "right child survives");
    }

    #[test]
    fn slice_carves_items_with_spanning_children() {
        let internal: BNode<i32, String> = BNode {
            items: vec![
                Item { key: 2, value: "2".into() },
                Item { key: 5, value: "5".into() },
                Item { key: 8, value: "8".into() },
            ],
            children: vec![
                Arc::new(leaf(&[0, 1])),
                Arc::new(leaf(&[3, 4])),
                Arc::new(leaf(&[6, 7])),
                Arc::new(leaf(&[9])),
            ],
        };
        let left = internal.slice(0, 1);
        assert_eq!(left.items.len(), 1);
        assert_eq!(left.children.len(), 2);
        let right = internal.slice(2, 3);
        assert_eq!(right.items.len(), 1);
        assert_eq!(right.children.len(), 2);
        assert!(internal.slice(2, 2).items.is_empty());
    }
}
