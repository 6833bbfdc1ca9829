//! Shared utilities.
//!
//! Hashing for cache keys, atomic file writes and test helpers.

pub mod fs;
pub mod hash;
