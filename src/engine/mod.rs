//! Core runner engine
//!
//! This module provides the load-and-infer pipeline:
//! - Runner: drives loader, cache and backend through the lifecycle
//! - LoadPlan: what `init` will fetch and construct
//! - RunnerState: lifecycle states

mod plan;
mod runner;
mod state;

pub use plan::{FetchPlan, LoadPlan};
pub use runner::Runner;
pub use state::{RunnerState, RunnerStatus};
