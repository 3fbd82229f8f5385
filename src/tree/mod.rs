//! # Concurrent Tree Walking
//!
//! This module manages a tree of mutable nodes and a machinery to search and
//! transform it concurrently. Each node carries a payload of a client type
//! `T` and maintains a position-significant vector of children.
//!
//! ## Architecture Overview
//!
//! Walks are expressed as chains of filters over a dataflow pipeline:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Walker (fluent builder) ──► Promise    │
//! ├─────────────────────────────────────────┤
//! │  Pipeline: stages, channels, watchdog   │
//! ├─────────────────────────────────────────┤
//! │  Node<T>: payload, rank, child vector   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! - [`node`]: the mutable tree storage
//! - [`pipeline`]: concurrent filter stages connected by bounded channels
//! - [`walker`]: the client-facing walk DSL and its filter tasks
//! - `rank`: per-stage child-completion counters for bottom-up walks

pub mod node;
pub(crate) mod pipeline;
pub(crate) mod rank;
pub mod walker;

pub use node::{Node, NodeRef};
pub use walker::{calc_rank, node_is_leaf, whatever, Action, Predicate, Promise, Walker};
