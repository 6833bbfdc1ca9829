//! Layer & cache management.
//!
//! Modules contribute filesystem content through named, flagged layers. The
//! [`LayerManager`] owns the physical storage, persists each layer's record
//! atomically, decides cache reuse from cache keys, and removes layers that
//! must not survive a build.

mod manager;
mod types;

pub use manager::{LayerManager, load_record};
pub use types::*;
