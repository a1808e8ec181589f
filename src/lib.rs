//! Async test execution engine
//!
//! Test hosts create and tear down instances (fixtures, parameter
//! enumerations, captured values, custom factories), invokers run test
//! bodies inside them, and every run yields a hierarchical
//! [`TestResult`](models::TestResult) tree.
//!
//! ```no_run
//! use async_test_engine::framework::{
//!     AggregatedInvoker, CancellationToken, LeafInvoker, TestContext, TestHost, TestInvoker,
//!     TestOutcome,
//! };
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let suite = AggregatedInvoker::new("Suite")
//!     .with_host(TestHost::boolean("flag"))
//!     .child(LeafInvoker::from_fn("Check", |ctx, _| async move {
//!         let flag = ctx.parameter_as::<bool>("flag");
//!         anyhow::ensure!(flag.is_some(), "flag is not bound");
//!         Ok(TestOutcome::Passed)
//!     }));
//!
//! let result = suite
//!     .invoke(&mut TestContext::default(), &CancellationToken::new())
//!     .await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod executor;
pub mod framework;
pub mod models;
pub mod output;
pub mod suites;
pub mod utils;
