//! # Arbor: Concurrent Tree Walking and Persistent Containers
//!
//! Arbor bundles two orthogonal pieces of functional-programming
//! infrastructure that share a design ethos (structural sharing, path-fold
//! transformations) but serve different jobs:
//!
//! - **Tree walking** ([`tree`]): a mutable, concurrency-safe tree of
//!   `Node<T>` together with a `Walker` that searches and transforms it
//!   through a pipeline of concurrent filter stages, returned to the caller
//!   as a future-style `Promise`.
//! - **Persistent containers**: an ordered map over a copy-on-write B-tree
//!   ([`btree`]) and an indexed sequence over a tail-buffered trie
//!   ([`vector`]). Modifications return new incarnations that share all
//!   untouched structure with their predecessors; immutability makes every
//!   incarnation freely shareable across threads without locks.
//!
//! ## Quick Start
//!
//! Walking a tree:
//!
//! ```ignore
//! use arbor::tree::{Node, Walker};
//!
//! let root = Node::new(1);
//! root.add_child(&Node::new(2)).add_child(&Node::new(10));
//!
//! let future = Walker::new(Some(root))
//!     .descendents_with(|test, _| Ok((*test.payload() > 5).then(|| test.clone())))
//!     .promise();
//! let (selection, err) = future.wait();
//! ```
//!
//! Persistent containers:
//!
//! ```ignore
//! use arbor::btree::Tree;
//! use arbor::vector::Vector;
//!
//! let tree = Tree::immutable().with(42, "Galaxy");
//! assert_eq!(tree.find(&42), Some(&"Galaxy"));
//!
//! let vec = Vector::immutable().push(77).push(78);
//! assert_eq!(vec.get(1)?, &78);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────┬───────────────────────────────┐
//! │   Core A: tree walking  │  Core B: persistent containers│
//! ├─────────────────────────┼───────────────────────────────┤
//! │ Walker / Promise (DSL)  │  btree::Tree   vector::Vector │
//! ├─────────────────────────┼───────────────────────────────┤
//! │ Pipeline: stages,       │  COW spine: slot paths,       │
//! │ channels, work counter  │  right fold, split/balance    │
//! ├─────────────────────────┼───────────────────────────────┤
//! │ Node<T>: child vector   │  shared nodes (Arc)           │
//! └─────────────────────────┴───────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`tree`]: mutable tree, filter pipeline, walker DSL
//! - [`btree`]: persistent ordered map
//! - [`vector`]: persistent indexed sequence
//! - [`config`]: tuning constants and derivation assertions
//! - [`error`]: the walk-error taxonomy

pub mod btree;
pub mod config;
pub mod error;
pub mod tree;
pub mod vector;

pub use error::WalkError;
pub use tree::{Node, NodeRef, Promise, Walker};
