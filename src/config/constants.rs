//! # Arbor Configuration Constants
//!
//! This module centralizes the tuning constants for the walker pipeline and
//! the persistent containers, grouping interdependent values together and
//! documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! MIN_STAGE_WORKERS (3) ── MAX_STAGE_WORKERS (10)
//!       │
//!       └─> Per-stage worker pool = clamp(available_parallelism, MIN, MAX)
//!
//! STAGE_OUTPUT_BOUND (3)
//!       │
//!       └─> Output channels are deliberately small: a full channel routes
//!           the send through the asynchronous fallback path instead of
//!           blocking a worker.
//!
//! MAX_STAGE_BUFFER (128)
//!       │
//!       └─> Upper bound for a stage's internal re-scheduling queue.
//!
//! DEFAULT_LOW_WATER_MARK (3)
//!       │
//!       └─> DEFAULT_HIGH_WATER_MARK = ceiling(low · 2) − 2
//!           ceiling() is the power-of-two capacity ceiling; the −2 keeps
//!           headroom for one extra item and one extra child link in every
//!           node allocation.
//!
//! DEFAULT_DEGREE_EXPONENT (3)
//!       │
//!       └─> Vector trie degree = 1 << exponent; exponent clamped to
//!           [MIN_DEGREE_EXPONENT, MAX_DEGREE_EXPONENT].
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `MIN_STAGE_WORKERS <= MAX_STAGE_WORKERS`
//! 2. `DEFAULT_HIGH_WATER_MARK == ceiling(DEFAULT_LOW_WATER_MARK * 2) - 2`
//! 3. `MIN_DEGREE_EXPONENT <= DEFAULT_DEGREE_EXPONENT <= MAX_DEGREE_EXPONENT`

// ============================================================================
// PIPELINE CONFIGURATION
// ============================================================================

/// Minimum number of concurrent workers per filter stage.
pub const MIN_STAGE_WORKERS: usize = 3;

/// Maximum number of concurrent workers per filter stage.
pub const MAX_STAGE_WORKERS: usize = 10;

/// Bound of a stage's output channel.
///
/// Kept small on purpose: pipeline back-pressure is absorbed by the
/// asynchronous send fallback, not by blocking workers.
pub const STAGE_OUTPUT_BOUND: usize = 3;

/// Bound of the pipeline's front input channel.
pub const PIPELINE_INPUT_BOUND: usize = 10;

/// Bound of the pipeline-global error channel.
/// Only the most recent error is reported to the promise caller.
pub const ERROR_CHANNEL_BOUND: usize = 20;

/// Maximum length of a stage's internal buffer queue, used by filters that
/// re-schedule nodes for a second visit (descendents, top-down, bottom-up).
pub const MAX_STAGE_BUFFER: usize = 128;

const _: () = assert!(
    MIN_STAGE_WORKERS <= MAX_STAGE_WORKERS,
    "worker pool clamp is inverted"
);

// ============================================================================
// ORDERED-MAP WATER MARKS
// ============================================================================

/// Default minimum number of items in a non-root B-tree node.
pub const DEFAULT_LOW_WATER_MARK: usize = 3;

/// Default maximum number of items in a B-tree node, derived from the low
/// water mark. The derivation leaves room for one more item plus a child
/// link before a node allocation has to grow.
pub const DEFAULT_HIGH_WATER_MARK: usize = ceiling(DEFAULT_LOW_WATER_MARK * 2) - 2;

const _: () = assert!(
    DEFAULT_HIGH_WATER_MARK == ceiling(DEFAULT_LOW_WATER_MARK * 2) - 2,
    "high water mark derivation mismatch"
);

const _: () = assert!(
    DEFAULT_LOW_WATER_MARK >= 2,
    "nodes must hold at least two items to rebalance"
);

// ============================================================================
// VECTOR TRIE DEGREE
// ============================================================================

/// Default degree exponent for the vector trie (degree 8).
pub const DEFAULT_DEGREE_EXPONENT: usize = 3;

/// Smallest accepted degree exponent (degree 2).
pub const MIN_DEGREE_EXPONENT: usize = 1;

/// Largest accepted degree exponent (degree 32).
pub const MAX_DEGREE_EXPONENT: usize = 5;

const _: () = assert!(
    MIN_DEGREE_EXPONENT <= DEFAULT_DEGREE_EXPONENT
        && DEFAULT_DEGREE_EXPONENT <= MAX_DEGREE_EXPONENT,
    "default degree exponent out of range"
);

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Power-of-two capacity ceiling used for B-tree node allocations.
///
/// Returns the smallest power of two strictly greater than `n + 1`, so an
/// allocation of `ceiling(n)` always has headroom of at least two beyond the
/// current count. `ceiling(0) == 0`.
pub const fn ceiling(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut m = n + 1;
    while m & (m - 1) > 0 {
        m &= m - 1;
    }
    m << 1
}
