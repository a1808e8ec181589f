//! Repeat and fork combinators

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::TestContext;
use super::error::EngineResult;
use super::invoker::{panic_message, TestInvoker};
use crate::models::{TestError, TestFlags, TestResult, TestStatus};
use crate::utils::timer::Timer;

/// Parameter name of the iteration segment
pub const ITERATION_PARAMETER: &str = "iteration";
/// Parameter name of the fork segment
pub const FORK_PARAMETER: &str = "fork";

/// Runs an inner invoker a fixed number of times
pub struct RepeatedInvoker {
    name: String,
    count: usize,
    flags: TestFlags,
    inner: Arc<dyn TestInvoker>,
}

impl RepeatedInvoker {
    pub fn new(name: impl Into<String>, count: usize, inner: Arc<dyn TestInvoker>) -> Self {
        Self {
            name: name.into(),
            count,
            flags: TestFlags::BROWSABLE,
            inner,
        }
    }

    pub fn with_flags(mut self, flags: TestFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[async_trait]
impl TestInvoker for RepeatedInvoker {
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
        let mut result = TestResult::new(ctx.name().clone());
        let timer = Timer::start(self.name.as_str());
        let mut canceled = false;

        for iteration in 0..self.count {
            if cancel.is_cancelled() {
                canceled = true;
                break;
            }

            ctx.push_parameter(ITERATION_PARAMETER, iteration.to_string());
            let invoked = self.inner.invoke(ctx, cancel).await;
            ctx.pop_name();

            let child = match invoked {
                Ok(child) => child,
                Err(error) => {
                    ctx.pop_name();
                    return Err(error);
                }
            };

            let failed = matches!(child.status(), TestStatus::Error | TestStatus::Canceled);
            result.add_child(child);

            if failed && !self.flags.continue_on_error() {
                ctx.debug(1, format_args!("{}: stopping after iteration {iteration}", self.name));
                break;
            }
        }

        ctx.pop_name();
        result.duration_ms = timer.elapsed_ms();
        if canceled {
            result.set_status(TestStatus::Canceled);
        } else if result.status() == TestStatus::None {
            result.set_status(TestStatus::Success);
        }
        Ok(result)
    }
}

/// Builds a fresh subtree for one fork
pub type InvokerBuilder = Arc<dyn Fn() -> Arc<dyn TestInvoker> + Send + Sync>;

/// Runs independent copies of a subtree concurrently on tokio tasks.
///
/// Each copy is built fresh, so no host is shared between forks. Results
/// are collected in fork order.
pub struct ForkedInvoker {
    name: String,
    count: usize,
    random_delay_ms: Option<u64>,
    builder: InvokerBuilder,
}

impl ForkedInvoker {
    pub fn new<F>(name: impl Into<String>, count: usize, builder: F) -> Self
    where
        F: Fn() -> Arc<dyn TestInvoker> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            count,
            random_delay_ms: None,
            builder: Arc::new(builder),
        }
    }

    /// Delay each fork's start by a random amount up to `max_ms`
    pub fn with_random_delay(mut self, max_ms: u64) -> Self {
        self.random_delay_ms = Some(max_ms).filter(|ms| *ms > 0);
        self
    }
}

#[async_trait]
impl TestInvoker for ForkedInvoker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
    ) -> EngineResult<TestResult> {
        ctx.push_name(self.name.as_str());
        let name = ctx.name().clone();
        let mut result = TestResult::new(name.clone());

        if cancel.is_cancelled() {
            ctx.pop_name();
            result.set_status(TestStatus::Canceled);
            return Ok(result);
        }

        let timer = Timer::start(self.name.as_str());
        let mut handles = Vec::with_capacity(self.count);

        for index in 0..self.count {
            let mut fork_ctx = ctx.fork(index);
            fork_ctx.push_parameter(FORK_PARAMETER, index.to_string());
            let invoker = (self.builder)();
            let cancel = cancel.clone();
            let delay = self.random_delay_ms.map(|max| rand::random_range(0..=max));

            let handle = tokio::spawn(async move {
                if let Some(ms) = delay {
                    debug!(fork = index, delay_ms = ms, "Delaying fork");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                invoker.invoke(&mut fork_ctx, &cancel).await
            });

            handles.push(handle);
        }

        let joined = join_all(handles).await;
        ctx.pop_name();

        for (index, joined) in joined.into_iter().enumerate() {
            match joined {
                Ok(Ok(child)) => result.add_child(child),
                Ok(Err(error)) => return Err(error),
                Err(error) => {
                    warn!(fork = index, "Fork did not complete: {error}");
                    let message = if error.is_panic() {
                        format!("test panicked: {}", panic_message(error.into_panic().as_ref()))
                    } else {
                        error.to_string()
                    };
                    let mut failed = TestResult::new(name.child(format!("{FORK_PARAMETER}{index}")));
                    failed.add_error(TestError::new(message));
                    result.add_child(failed);
                }
            }
        }

        result.duration_ms = timer.elapsed_ms();
        if result.status() == TestStatus::None {
            result.set_status(TestStatus::Success);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::aggregated::AggregatedInvoker;
    use crate::framework::host::TestHost;
    use crate::framework::instance::Fixture;
    use crate::framework::invoker::{LeafInvoker, TestOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>, fail_at: Option<usize>) -> Arc<dyn TestInvoker> {
        Arc::new(LeafInvoker::from_fn("Step", move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if Some(n) == fail_at {
                    Ok(TestOutcome::Failed(format!("step {n}")))
                } else {
                    Ok(TestOutcome::Passed)
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_repeat_names_iterations() {
        let counter = Arc::new(AtomicUsize::new(0));
        let repeat = RepeatedInvoker::new("Repeat", 3, counting(counter.clone(), None));

        let mut ctx = TestContext::default();
        let result = repeat
            .invoke(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.children()[2].name.to_string(),
            "Repeat(iteration=2).Step"
        );
        assert!(ctx.name().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_stops_on_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let repeat = RepeatedInvoker::new("Repeat", 5, counting(counter.clone(), Some(1)));

        let mut ctx = TestContext::default();
        let result = repeat
            .invoke(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(result.children().len(), 2);

        let counter = Arc::new(AtomicUsize::new(0));
        let repeat = RepeatedInvoker::new("Repeat", 5, counting(counter.clone(), Some(1)))
            .with_flags(TestFlags::BROWSABLE | TestFlags::CONTINUE_ON_ERROR);
        let result = repeat
            .invoke(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.children().len(), 5);
    }

    #[tokio::test]
    async fn test_forks_run_independent_hosts() {
        let forked = ForkedInvoker::new("Forked", 4, || {
            Arc::new(
                AggregatedInvoker::new("Copy")
                    .with_host(TestHost::fixture("db", |_| Ok(Fixture::new(5u32))))
                    .child(LeafInvoker::from_fn("Check", |ctx, _| async move {
                        let value = ctx.fixture::<u32>().map(|v| *v);
                        anyhow::ensure!(value == Some(5), "fixture missing");
                        anyhow::ensure!(ctx.fork_index().is_some(), "not forked");
                        Ok(TestOutcome::Passed)
                    })),
            ) as Arc<dyn TestInvoker>
        })
        .with_random_delay(5);

        let mut ctx = TestContext::default();
        let result = forked
            .invoke(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        let names: Vec<_> = result.children().iter().map(|c| c.name.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "Forked(fork=0).Copy",
                "Forked(fork=1).Copy",
                "Forked(fork=2).Copy",
                "Forked(fork=3).Copy"
            ]
        );
    }

    #[tokio::test]
    async fn test_forked_canceled_before_start() {
        let forked = ForkedInvoker::new("Forked", 2, || {
            Arc::new(LeafInvoker::from_fn("Never", |_, _| async {
                Ok(TestOutcome::Passed)
            })) as Arc<dyn TestInvoker>
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = forked
            .invoke(&mut TestContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(result.status(), TestStatus::Canceled);
        assert!(!result.has_children());
    }
}
