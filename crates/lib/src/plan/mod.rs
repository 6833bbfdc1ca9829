//! Detection contracts and build-plan negotiation.

mod resolve;
mod types;

pub use resolve::resolve;
pub use types::*;
