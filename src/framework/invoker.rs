//! Test invokers
//!
//! An invoker is the executable unit of the engine. Leaf invokers run a
//! test body; composites are built in [`super::aggregated`].

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::context::TestContext;
use super::error::{EngineError, EngineResult};
use crate::models::{TestError, TestFlags, TestResult};
use crate::utils::timer::Timer;

#[async_trait]
pub trait TestInvoker: Send + Sync {
    fn name(&self) -> &str;

    fn flags(&self) -> TestFlags {
        TestFlags::BROWSABLE
    }

    /// Run and produce a result node.
    ///
    /// Only engine invariant violations are returned as `Err`.
    async fn invoke(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
    ) -> EngineResult<TestResult>;
}

/// Outcome reported by a test body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
    Ignored(String),
}

#[async_trait]
pub trait TestBody: Send + Sync {
    async fn run(
        &self,
        ctx: &TestContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TestOutcome>;
}

/// Body backed by an async closure
pub struct FnBody<F> {
    f: F,
}

impl<F> FnBody<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TestBody for FnBody<F>
where
    F: Fn(TestContext, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TestOutcome>> + Send + 'static,
{
    async fn run(
        &self,
        ctx: &TestContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TestOutcome> {
        (self.f)(ctx.clone(), cancel.clone()).await
    }
}

/// Invoker running a single test body
pub struct LeafInvoker {
    name: String,
    flags: TestFlags,
    categories: Vec<String>,
    body: Arc<dyn TestBody>,
}

impl LeafInvoker {
    pub fn new(name: impl Into<String>, body: impl TestBody + 'static) -> Self {
        Self {
            name: name.into(),
            flags: TestFlags::BROWSABLE,
            categories: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TestContext, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TestOutcome>> + Send + 'static,
    {
        Self::new(name, FnBody { f })
    }

    pub fn with_flags(mut self, flags: TestFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }
}

#[async_trait]
impl TestInvoker for LeafInvoker {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> TestFlags {
        self.flags
    }

    async fn invoke(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
    ) -> EngineResult<TestResult> {
        ctx.push_name(self.name.as_str());
        let name = ctx.name().clone();
        let depth = ctx.categories().len();

        if let Some(reason) = ctx.enter_categories(&self.categories, true) {
            ctx.leave_categories(depth);
            ctx.pop_name();
            ctx.debug(2, format_args!("{name}: skipped, {reason}"));
            return Ok(TestResult::ignored(name, reason));
        }

        if cancel.is_cancelled() {
            ctx.leave_categories(depth);
            ctx.pop_name();
            return Ok(TestResult::canceled(name));
        }

        ctx.push_result_scope();
        let timer = Timer::start(name.to_string());
        let outcome = AssertUnwindSafe(self.body.run(ctx, cancel))
            .catch_unwind()
            .await;

        let mut result = match outcome {
            Ok(Ok(TestOutcome::Passed)) => TestResult::success(name),
            Ok(Ok(TestOutcome::Failed(message))) => {
                let mut result = TestResult::new(name);
                result.add_error(TestError::new(message));
                result
            }
            Ok(Ok(TestOutcome::Ignored(reason))) => TestResult::ignored(name, reason),
            Ok(Err(error)) if is_cancellation(&error) => TestResult::canceled(name),
            Ok(Err(error)) => TestResult::error(name, &error),
            Err(panic) => {
                let mut result = TestResult::new(name);
                result.add_error(TestError::new(format!(
                    "test panicked: {}",
                    panic_message(panic.as_ref())
                )));
                result
            }
        };

        for message in ctx.pop_result_scope() {
            result.add_message(message);
        }
        result.duration_ms = timer.stop().as_millis() as u64;
        ctx.leave_categories(depth);
        ctx.pop_name();

        debug!(test = %result.name, status = %result.status(), "Leaf finished");
        Ok(result)
    }
}

/// Whether a body error reports a cancellation
pub(crate) fn is_cancellation(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<EngineError>()
        .map(EngineError::is_canceled)
        .unwrap_or(false)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
