//! # Arbor Configuration Module
//!
//! This module centralizes all configuration constants for the crate.
//! Constants are grouped by their functional area and interdependencies are
//! documented and enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The walker pipeline and the persistent containers both derive limits from
//! a handful of base values (channel bounds from the worker-pool clamp, the
//! high water mark from the low water mark). Co-locating the constants and
//! asserting the derivations keeps interdependent values from drifting apart.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
