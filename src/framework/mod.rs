//! Async test execution engine
//!
//! Hosts create instances, invokers run them, and every run produces a
//! hierarchical [`TestResult`](crate::models::TestResult) tree.

mod aggregated;
mod capture;
mod combinators;
mod context;
mod error;
mod host;
mod instance;
mod invoker;
mod parameter;
mod registry;

pub use aggregated::AggregatedInvoker;
pub use capture::{capture_context, snapshot, CapturedBinding, CapturedInvoker};
pub use combinators::{
    ForkedInvoker, InvokerBuilder, RepeatedInvoker, FORK_PARAMETER, ITERATION_PARAMETER,
};
pub use context::{CategoryFilter, ContextSettings, TestContext};
pub use error::{check_canceled, EngineError, EngineResult};
pub use host::{ReusePolicy, TestHost};
pub use instance::{CustomInstanceFactory, Fixture, FixtureCtor, InstanceVariant, TestInstance};
pub use invoker::{FnBody, LeafInvoker, TestBody, TestInvoker, TestOutcome};
pub use parameter::{apply_filter, BooleanSource, FnSource, ListSource, ParameterSource, ParameterValue};
pub use registry::{FactoryRef, Registry, SourceRef, BOOLEAN_SOURCE};

pub use tokio_util::sync::CancellationToken;
