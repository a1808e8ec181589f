//! Aggregated invoker
//!
//! Composite invoker owning an optional host and an ordered list of children.
//! One outer invocation runs setup, iterates the host's values invoking the
//! children for each, then tears the host down.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::context::TestContext;
use super::error::EngineResult;
use super::host::{ReusePolicy, TestHost};
use super::instance::TestInstance;
use super::invoker::{is_cancellation, panic_message, TestInvoker};
use crate::models::{TestError, TestFlags, TestResult, TestStatus};
use crate::utils::timer::Timer;

/// Tracks whether iteration was cut short by cancellation
#[derive(Default)]
struct RunState {
    canceled: bool,
}

pub struct AggregatedInvoker {
    name: String,
    flags: TestFlags,
    categories: Vec<String>,
    host: Option<TestHost>,
    children: Vec<Arc<dyn TestInvoker>>,
}

impl AggregatedInvoker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: TestFlags::BROWSABLE,
            categories: Vec::new(),
            host: None,
            children: Vec::new(),
        }
    }

    pub fn with_host(mut self, host: TestHost) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_flags(mut self, flags: TestFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Tag this invoker and everything below it
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn child(self, child: impl TestInvoker + 'static) -> Self {
        self.child_arc(Arc::new(child))
    }

    pub fn child_arc(mut self, child: Arc<dyn TestInvoker>) -> Self {
        self.children.push(child);
        self
    }

    pub fn host(&self) -> Option<&TestHost> {
        self.host.as_ref()
    }

    pub fn children(&self) -> &[Arc<dyn TestInvoker>] {
        &self.children
    }

    fn continue_on_error(&self) -> bool {
        self.flags.continue_on_error()
            || self
                .host
                .as_ref()
                .map(|host| host.flags().continue_on_error())
                .unwrap_or(false)
    }

    fn flatten(&self, host: &TestHost) -> bool {
        self.flags.contains(TestFlags::FLATTEN_HIERARCHY)
            || host.flags().contains(TestFlags::FLATTEN_HIERARCHY)
    }

    async fn run(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
        result: &mut TestResult,
        state: &mut RunState,
    ) -> EngineResult<()> {
        let Some(host) = &self.host else {
            self.invoke_children(ctx, cancel, result, &self.children, state)
                .await?;
            return Ok(());
        };

        let instance = match host.create_instance(ctx, cancel).await {
            Ok(instance) => instance,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                let error = anyhow::Error::from(error);
                state.canceled |= is_cancellation(&error);
                result.add_child(phase_result(ctx, "SetUp", &error));
                return Ok(());
            }
        };

        let iterated = self
            .iterate(host, &instance, ctx, cancel, result, state)
            .await;

        match host.destroy_instance(ctx, cancel).await {
            Ok(()) => {}
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                result.add_child(phase_result(ctx, "TearDown", &anyhow::Error::from(error)));
            }
        }

        iterated
    }

    async fn iterate(
        &self,
        host: &TestHost,
        instance: &Arc<TestInstance>,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
        result: &mut TestResult,
        state: &mut RunState,
    ) -> EngineResult<()> {
        if !instance.is_enumerable() {
            self.run_value(instance, ctx, cancel, result, &self.children, state)
                .await?;
            return Ok(());
        }

        match host.reuse() {
            ReusePolicy::Shared => {
                self.enumerate(host, instance, ctx, cancel, result, &self.children, state)
                    .await?;
            }
            ReusePolicy::PerChild => {
                for child in &self.children {
                    if cancel.is_cancelled() {
                        state.canceled = true;
                        break;
                    }

                    instance.rewind();
                    let children = std::slice::from_ref(child);
                    let passed = self
                        .enumerate(host, instance, ctx, cancel, result, children, state)
                        .await?;
                    if !passed && !self.continue_on_error() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Run `children` once for every remaining value of `instance`
    #[allow(clippy::too_many_arguments)]
    async fn enumerate(
        &self,
        host: &TestHost,
        instance: &Arc<TestInstance>,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
        result: &mut TestResult,
        children: &[Arc<dyn TestInvoker>],
        state: &mut RunState,
    ) -> EngineResult<bool> {
        let mut passed = true;

        loop {
            if cancel.is_cancelled() {
                state.canceled = true;
                break;
            }

            match instance.move_next(ctx, cancel).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => {
                    state.canceled |= is_cancellation(&error);
                    result.add_child(phase_result(ctx, "MoveNext", &error));
                    passed = false;
                    break;
                }
            }

            let parameter = instance.parameter_name().unwrap_or(host.name()).to_string();
            let value = instance
                .current()
                .map(|v| v.identifier().to_string())
                .unwrap_or_default();
            ctx.debug(2, format_args!("{}: running with {parameter}={value}", self.name));

            ctx.push_parameter(parameter, value);
            let mut group = TestResult::new(ctx.name().clone());
            let ran = self
                .run_value(instance, ctx, cancel, &mut group, children, state)
                .await;
            ctx.pop_name();

            if !ran? {
                passed = false;
            }

            if self.flatten(host) {
                for child in group.take_children() {
                    result.add_child(child);
                }
            } else {
                finalize(&mut group, false);
                result.add_child(group);
            }

            if !passed && !self.continue_on_error() {
                break;
            }
        }

        Ok(passed)
    }

    /// `pre_run`, the children, then `post_run` for the current value
    async fn run_value(
        &self,
        instance: &Arc<TestInstance>,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
        node: &mut TestResult,
        children: &[Arc<dyn TestInvoker>],
        state: &mut RunState,
    ) -> EngineResult<bool> {
        if let Err(error) = instance.pre_run(ctx, cancel).await {
            state.canceled |= is_cancellation(&error);
            node.add_child(phase_result(ctx, "PreRun", &error));
            return Ok(false);
        }

        let passed = self
            .invoke_children(ctx, cancel, node, children, state)
            .await?;

        if let Err(error) = instance.post_run(ctx, cancel).await {
            node.add_child(phase_result(ctx, "PostRun", &error));
            return Ok(false);
        }

        Ok(passed)
    }

    async fn invoke_children(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
        node: &mut TestResult,
        children: &[Arc<dyn TestInvoker>],
        state: &mut RunState,
    ) -> EngineResult<bool> {
        let mut passed = true;

        for child in children {
            if cancel.is_cancelled() {
                state.canceled = true;
                break;
            }

            let checkpoint = ctx.checkpoint();
            let invoked = AssertUnwindSafe(child.invoke(ctx, cancel))
                .catch_unwind()
                .await;

            let mut child_result = match invoked {
                Ok(result) => result?,
                Err(panic) => {
                    ctx.restore(checkpoint);
                    let mut result = TestResult::new(ctx.name().child(child.name()));
                    result.add_error(TestError::new(format!(
                        "test panicked: {}",
                        panic_message(panic.as_ref())
                    )));
                    result
                }
            };

            let child_passed = !matches!(
                child_result.status(),
                TestStatus::Error | TestStatus::Canceled
            );

            state.canceled |= child_result.is_canceled();

            if child.flags().is_browsable() || !child_result.has_children() {
                node.add_child(child_result);
            } else {
                let status = child_result.status();
                for grandchild in child_result.take_children() {
                    node.add_child(grandchild);
                }
                node.set_status(node.status().merge(status));
            }

            if !child_passed {
                passed = false;
                if !self.continue_on_error() {
                    break;
                }
            }
        }

        Ok(passed)
    }
}

#[async_trait]
impl TestInvoker for AggregatedInvoker {
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
        let checkpoint = ctx.checkpoint();
        ctx.push_name(self.name.as_str());
        let mut result = TestResult::new(ctx.name().clone());

        if let Some(reason) = ctx.enter_categories(&self.categories, false) {
            ctx.restore(checkpoint);
            ctx.debug(2, format_args!("{}: skipped, {reason}", self.name));
            return Ok(TestResult::ignored(result.name, reason));
        }

        if self.children.is_empty() {
            ctx.restore(checkpoint);
            result.set_status(TestStatus::Success);
            return Ok(result);
        }

        if cancel.is_cancelled() {
            ctx.restore(checkpoint);
            result.set_status(TestStatus::Canceled);
            return Ok(result);
        }

        ctx.debug(1, format_args!("Invoking {}", self.name));
        ctx.push_result_scope();
        let timer = Timer::start(self.name.as_str());
        let mut state = RunState::default();

        let ran = self.run(ctx, cancel, &mut result, &mut state).await;

        let messages = ctx.pop_result_scope();
        ctx.restore(checkpoint);
        ran?;

        for message in messages {
            result.add_message(message);
        }
        result.duration_ms = timer.stop().as_millis() as u64;
        finalize(&mut result, state.canceled);

        debug!(
            test = %result.name,
            status = %result.status(),
            children = result.children().len(),
            "Aggregate finished"
        );
        Ok(result)
    }
}

/// Error (or canceled) node for a failed lifecycle phase
fn phase_result(ctx: &TestContext, phase: &str, error: &anyhow::Error) -> TestResult {
    let name = ctx.name().child(phase);
    if is_cancellation(error) {
        TestResult::canceled(name)
    } else {
        TestResult::error(name, error)
    }
}

fn finalize(result: &mut TestResult, canceled: bool) {
    if canceled {
        result.set_status(TestStatus::Canceled);
    } else if result.status() == TestStatus::None {
        result.set_status(TestStatus::Success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::combinators::RepeatedInvoker;
    use crate::framework::instance::{CustomInstanceFactory, Fixture};
    use crate::framework::invoker::{LeafInvoker, TestOutcome};
    use crate::framework::parameter::{ListSource, ParameterValue};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    fn pass(name: &str) -> LeafInvoker {
        LeafInvoker::from_fn(name, |_, _| async { Ok(TestOutcome::Passed) })
    }

    fn fail(name: &str) -> LeafInvoker {
        LeafInvoker::from_fn(name, |_, _| async { Ok(TestOutcome::Failed("boom".into())) })
    }

    fn child_names(result: &TestResult) -> Vec<String> {
        result
            .children()
            .iter()
            .map(|c| c.name.local_name().unwrap_or_default().to_string())
            .collect()
    }

    #[derive(Default)]
    struct CountingFactory {
        destroyed: AtomicUsize,
        fail_destroy: bool,
    }

    #[async_trait]
    impl CustomInstanceFactory for CountingFactory {
        async fn initialize(
            &self,
            _ctx: &TestContext,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<ParameterValue> {
            Ok(ParameterValue::new(7u32))
        }

        async fn destroy(
            &self,
            _ctx: &TestContext,
            _value: &ParameterValue,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            if self.fail_destroy {
                anyhow::bail!("socket still open");
            }
            Ok(())
        }
    }

    async fn invoke(invoker: &AggregatedInvoker) -> TestResult {
        let mut ctx = TestContext::default();
        assert_ok!(invoker.invoke(&mut ctx, &CancellationToken::new()).await)
    }

    #[tokio::test]
    async fn test_no_children_succeeds() {
        let result = invoke(&AggregatedInvoker::new("Empty")).await;
        assert_eq!(result.status(), TestStatus::Success);
        assert!(!result.has_children());
    }

    #[tokio::test]
    async fn test_children_keep_declaration_order() {
        let invoker = AggregatedInvoker::new("Suite")
            .with_flags(TestFlags::BROWSABLE | TestFlags::CONTINUE_ON_ERROR)
            .child(pass("A"))
            .child(fail("B"))
            .child(pass("C"));

        let result = invoke(&invoker).await;
        assert_eq!(child_names(&result), vec!["A", "B", "C"]);
        assert_eq!(result.status(), TestStatus::Error);
    }

    #[tokio::test]
    async fn test_stop_on_first_failure() {
        let invoker = AggregatedInvoker::new("Suite")
            .child(fail("Fail1"))
            .child(pass("Pass1"));

        let result = invoke(&invoker).await;
        assert_eq!(child_names(&result), vec!["Fail1"]);
        assert_eq!(result.children()[0].status(), TestStatus::Error);
    }

    #[tokio::test]
    async fn test_ignored_child_does_not_stop_siblings() {
        let invoker = AggregatedInvoker::new("Suite")
            .child(LeafInvoker::from_fn("Skip", |_, _| async {
                Ok(TestOutcome::Ignored("n/a".into()))
            }))
            .child(pass("Run"));

        let result = invoke(&invoker).await;
        assert_eq!(child_names(&result), vec!["Skip", "Run"]);
        assert_eq!(result.status(), TestStatus::Success);
    }

    #[tokio::test]
    async fn test_one_group_per_value() {
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::parameterized(
                "flag",
                "flag",
                ListSource::new([true, false]),
            ))
            .child(pass("C"));

        let result = invoke(&invoker).await;
        assert_eq!(result.children().len(), 2);
        assert_eq!(result.children()[0].name.to_string(), "Suite(flag=true)");
        assert_eq!(result.children()[1].name.to_string(), "Suite(flag=false)");
        for group in result.children() {
            assert_eq!(group.status(), TestStatus::Success);
            assert_eq!(group.children()[0].name.local_name(), Some("C"));
        }
    }

    #[tokio::test]
    async fn test_flattened_values() {
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(
                TestHost::parameterized("n", "n", ListSource::new([1, 2]))
                    .with_flags(TestFlags::FLATTEN_HIERARCHY),
            )
            .child(pass("C"));

        let result = invoke(&invoker).await;
        let names: Vec<_> = result.children().iter().map(|c| c.name.to_string()).collect();
        assert_eq!(names, vec!["Suite(n=1).C", "Suite(n=2).C"]);
    }

    #[tokio::test]
    async fn test_reuse_policies() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str| {
            let order = Arc::clone(&order);
            LeafInvoker::from_fn(name, move |ctx, _| {
                let order = Arc::clone(&order);
                async move {
                    let n = ctx.parameter_as::<i32>("n").unwrap_or_default();
                    order.lock().push(format!("{name}{n}"));
                    Ok(TestOutcome::Passed)
                }
            })
        };

        let shared = AggregatedInvoker::new("Shared")
            .with_host(TestHost::parameterized("n", "n", ListSource::new([1, 2])))
            .child(record("A"))
            .child(record("B"));
        invoke(&shared).await;
        assert_eq!(*order.lock(), vec!["A1", "B1", "A2", "B2"]);

        order.lock().clear();
        let per_child = AggregatedInvoker::new("PerChild")
            .with_host(
                TestHost::parameterized("n", "n", ListSource::new([1, 2]))
                    .with_reuse(ReusePolicy::PerChild),
            )
            .child(record("A"))
            .child(record("B"));
        invoke(&per_child).await;
        assert_eq!(*order.lock(), vec!["A1", "A2", "B1", "B2"]);
    }

    #[tokio::test]
    async fn test_teardown_runs_once_after_failure() {
        let factory = Arc::new(CountingFactory::default());
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::custom("server", factory.clone()))
            .child(fail("Only"));

        let result = invoke(&invoker).await;
        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_failure_flips_status() {
        let factory = Arc::new(CountingFactory {
            fail_destroy: true,
            ..Default::default()
        });
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::custom("server", factory))
            .child(pass("Only"));

        let result = invoke(&invoker).await;
        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(child_names(&result), vec!["Only", "TearDown"]);
        assert_eq!(result.children()[1].errors()[0].causes, vec!["socket still open"]);
    }

    #[tokio::test]
    async fn test_setup_failure_skips_children() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::fixture("db", |_| anyhow::bail!("refused")))
            .child(LeafInvoker::from_fn("Query", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(TestOutcome::Passed) }
            }));

        let result = invoke(&invoker).await;
        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(child_names(&result), vec!["SetUp"]);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!invoker.host().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_canceled_before_start() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::fixture("db", |_| Ok(Fixture::new(1u8))))
            .child(LeafInvoker::from_fn("Query", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(TestOutcome::Passed) }
            }));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = TestContext::default();
        let result = invoker.invoke(&mut ctx, &cancel).await.unwrap();

        assert_eq!(result.status(), TestStatus::Canceled);
        assert!(!result.has_children());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_stops_siblings() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::fixture("db", |_| Ok(Fixture::new(1u8))))
            .child(LeafInvoker::from_fn("First", move |_, _| {
                trigger.cancel();
                async { Ok(TestOutcome::Passed) }
            }))
            .child(pass("Second"));

        let mut ctx = TestContext::default();
        let result = invoker.invoke(&mut ctx, &cancel).await.unwrap();

        assert_eq!(result.status(), TestStatus::Canceled);
        assert_eq!(child_names(&result), vec!["First"]);
        assert!(!invoker.host().unwrap().is_live());
        assert!(ctx.current_instance().is_none());
    }

    #[tokio::test]
    async fn test_panicking_composite_child_restores_context() {
        let invoker = AggregatedInvoker::new("Suite")
            .with_flags(TestFlags::BROWSABLE | TestFlags::CONTINUE_ON_ERROR)
            .child(PanickingInvoker)
            .child(pass("After"));

        let mut ctx = TestContext::default();
        let result = invoker
            .invoke(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(child_names(&result), vec!["Panics", "After"]);
        assert!(result.children()[0].errors()[0].message.contains("halfway"));
        assert!(ctx.name().is_empty());
    }

    #[tokio::test]
    async fn test_hidden_group_is_spliced() {
        let inner = AggregatedInvoker::new("Hidden")
            .with_flags(TestFlags::empty())
            .child(pass("X"))
            .child(pass("Y"));
        let invoker = AggregatedInvoker::new("Suite").child(inner).child(pass("Z"));

        let result = invoke(&invoker).await;
        assert_eq!(child_names(&result), vec!["X", "Y", "Z"]);
    }

    #[tokio::test]
    async fn test_canceled_hidden_group_cancels_parent() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let inner = AggregatedInvoker::new("Hidden")
            .with_flags(TestFlags::empty())
            .child(LeafInvoker::from_fn("X", move |_, _| {
                trigger.cancel();
                async { Ok(TestOutcome::Passed) }
            }))
            .child(pass("Y"));
        let invoker = AggregatedInvoker::new("Suite").child(inner).child(pass("Z"));

        let mut ctx = TestContext::default();
        let result = invoker.invoke(&mut ctx, &cancel).await.unwrap();

        assert_eq!(child_names(&result), vec!["X"]);
        assert_eq!(result.children()[0].status(), TestStatus::Success);
        assert_eq!(result.status(), TestStatus::Canceled);
    }

    #[tokio::test]
    async fn test_failed_hidden_group_fails_parent() {
        let inner = AggregatedInvoker::new("Hidden")
            .with_flags(TestFlags::empty())
            .with_host(TestHost::custom(
                "server",
                Arc::new(CountingFactory {
                    fail_destroy: true,
                    ..Default::default()
                }),
            ))
            .child(pass("X"));
        let invoker = AggregatedInvoker::new("Suite").child(inner).child(pass("Z"));

        let result = invoke(&invoker).await;
        assert_eq!(child_names(&result), vec!["X", "TearDown"]);
        assert_eq!(result.status(), TestStatus::Error);
    }

    #[tokio::test]
    async fn test_panicking_fixture_yields_setup_error() {
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::fixture("db", |_| -> anyhow::Result<Fixture> {
                panic!("driver missing")
            }))
            .child(pass("Query"));

        let result = invoke(&invoker).await;
        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(child_names(&result), vec!["SetUp"]);
        assert!(result.children()[0].errors()[0]
            .causes
            .iter()
            .any(|cause| cause.contains("driver missing")));
        assert!(!invoker.host().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_repeated_panicking_setup_stays_reusable() {
        let inner = AggregatedInvoker::new("Inner")
            .with_host(TestHost::fixture("db", |_| -> anyhow::Result<Fixture> {
                panic!("driver missing")
            }))
            .child(pass("Query"));
        let outer = AggregatedInvoker::new("Outer").child(inner);
        let repeated = RepeatedInvoker::new("Repeat", 2, Arc::new(outer))
            .with_flags(TestFlags::BROWSABLE | TestFlags::CONTINUE_ON_ERROR);

        let mut ctx = TestContext::default();
        let result = assert_ok!(repeated.invoke(&mut ctx, &CancellationToken::new()).await);

        assert_eq!(result.children().len(), 2);
        for iteration in result.children() {
            assert_eq!(iteration.status(), TestStatus::Error);
        }
        assert!(ctx.current_instance().is_none());
    }

    fn with_settings(settings: crate::framework::ContextSettings) -> TestContext {
        TestContext::new(
            settings,
            Arc::new(crate::framework::Registry::with_builtins()),
        )
    }

    #[tokio::test]
    async fn test_excluded_category_skips_setup() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let slow = AggregatedInvoker::new("Slow")
            .with_category("slow")
            .with_host(TestHost::fixture("db", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Fixture::new(1u8))
            }))
            .child(pass("Query"));
        let invoker = AggregatedInvoker::new("Suite").child(slow).child(pass("Fast"));

        let mut ctx = with_settings(
            crate::framework::ContextSettings::default().exclude_category("slow"),
        );
        let result = invoker
            .invoke(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(child_names(&result), vec!["Slow", "Fast"]);
        assert_eq!(result.children()[0].status(), TestStatus::Ignored);
        assert_eq!(result.status(), TestStatus::Success);
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(ctx.categories().is_empty());
    }

    #[tokio::test]
    async fn test_included_category_is_inherited() {
        let tls = AggregatedInvoker::new("Tls")
            .with_category("tls")
            .child(pass("Handshake"));
        let invoker = AggregatedInvoker::new("Suite")
            .child(tls)
            .child(pass("Plain"))
            .child(pass("Tagged").with_category("tls"));

        let mut ctx = with_settings(
            crate::framework::ContextSettings::default().include_category("tls"),
        );
        let result = invoker
            .invoke(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        let statuses: Vec<_> = result.children().iter().map(|c| c.status()).collect();
        assert_eq!(
            statuses,
            vec![TestStatus::Success, TestStatus::Ignored, TestStatus::Success]
        );
        assert_eq!(result.children()[0].children()[0].status(), TestStatus::Success);
    }

    #[tokio::test]
    async fn test_empty_source_succeeds() {
        let invoker = AggregatedInvoker::new("Suite")
            .with_host(TestHost::parameterized(
                "n",
                "n",
                ListSource::from_values(Vec::new()),
            ))
            .child(pass("Never"));

        let result = invoke(&invoker).await;
        assert_eq!(result.status(), TestStatus::Success);
        assert!(!result.has_children());
    }

    struct PanickingInvoker;

    #[async_trait]
    impl TestInvoker for PanickingInvoker {
        fn name(&self) -> &str {
            "Panics"
        }

        async fn invoke(
            &self,
            ctx: &mut TestContext,
            _cancel: &CancellationToken,
        ) -> EngineResult<TestResult> {
            ctx.push_name("Panics");
            ctx.push_name("Deeper");
            panic!("halfway through");
        }
    }
}
