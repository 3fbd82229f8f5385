//! # Walker Error Taxonomy
//!
//! Errors raised by the tree-walker machinery itself, as opposed to errors
//! returned by user-provided filter tasks (which travel through the pipeline
//! error channel as plain [`eyre::Report`]s).
//!
//! The kinds are deliberately few:
//!
//! - [`WalkError::EmptyTree`]: the promise of a walker that was created
//!   without an initial node.
//! - [`WalkError::InvalidFilter`]: a filter stage is defunct. Closures in
//!   Rust cannot be null, so this kind is not reachable through the typed
//!   builder API; it is kept so that the taxonomy stays stable for dynamic
//!   filter sources.
//! - [`WalkError::NoMoreFiltersAccepted`]: a builder was called after the
//!   promise had already been obtained.
//!
//! A promise caller can recover the kind from the report:
//!
//! ```ignore
//! let (selection, err) = walker.promise().wait();
//! if let Some(report) = err {
//!     if let Some(WalkError::EmptyTree) = report.downcast_ref::<WalkError>() {
//!         // walked a nil walker
//!     }
//! }
//! ```

use std::error::Error;
use std::fmt;

/// Errors produced by the walker/pipeline machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkError {
    /// Cannot walk an empty tree.
    EmptyTree,
    /// A filter stage is invalid.
    InvalidFilter,
    /// The walker is in promise mode and will not accept new filters.
    NoMoreFiltersAccepted,
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::EmptyTree => write!(f, "cannot walk empty tree"),
            WalkError::InvalidFilter => write!(f, "filter stage is invalid"),
            WalkError::NoMoreFiltersAccepted => {
                write!(f, "in promise mode; will not accept new filters; use a new walker")
            }
        }
    }
}

impl Error for WalkError {}
