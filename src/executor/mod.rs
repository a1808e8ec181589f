//! Suite execution
//!
//! Sequential runs with optional timeouts, parallel runs of independent
//! suites, and aggregation across rounds.

mod parallel;
mod runner;

pub use parallel::{aggregate_rounds, AggregateResult, ParallelExecutor, TestStats};
pub use runner::{RunReport, TestRunner};
