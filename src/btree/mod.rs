//! # Persistent Ordered Map (Copy-on-Write B-Tree)
//!
//! An immutable ordered map with structural sharing. Modifications clone
//! only the root-to-leaf spine they touch; untouched subtrees are shared
//! between tree incarnations through reference-counted handles.
//!
//! ## Module Overview
//!
//! - [`tree`]: the public `Tree<K, V>` API (`find`, `with`, `with_deleted`)
//!   and the split/balance machinery
//! - `node`: node storage and the copy-on-write primitives
//! - `path`: slots, slot paths and the right fold over a spine

mod node;
mod path;
mod tree;

pub use tree::Tree;
