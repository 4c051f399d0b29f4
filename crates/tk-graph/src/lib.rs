//! Dependency and readiness engine: filtering, ready/blocked
//! classification, wave computation for parallel scheduling, and the
//! id-keyed task graph.

pub mod filter;
pub mod graph;
pub mod readiness;
pub mod waves;

pub use filter::{AwaitingFilter, Filter};
pub use graph::TaskGraph;
pub use readiness::{blocked, ready, ready_include_awaiting, sort_by_priority_created_at};
pub use waves::{compute_waves, WavePlan};
