//! stackpack-lib: the build lifecycle engine.
//!
//! Build modules detect whether they apply to an application, negotiate a
//! build plan through provides/requires contracts, and contribute cacheable
//! filesystem layers plus environment exports:
//! - `exec`: observable, mockable execution of external tools
//! - `layer`: layer storage and cross-build cache decisions
//! - `plan`: detection contracts and build-plan negotiation
//! - `lifecycle`: detect/build orchestration and the build manifest
//! - `context`: per-invocation state handed to modules
//! - `declared`: modules defined in JSON rather than code

pub mod consts;
pub mod context;
pub mod declared;
pub mod environment;
pub mod exec;
pub mod layer;
pub mod lifecycle;
pub mod overrides;
pub mod plan;
pub mod testing;
pub mod types;
pub mod util;
