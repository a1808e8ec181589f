//! Context capture
//!
//! A captured invoker re-runs a subtree under a synthetic name while
//! re-exposing the parameter values bound by its ancestors. The values are
//! aliased through captured hosts, so no ancestor setup runs again.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::TestContext;
use super::error::{EngineError, EngineResult};
use super::host::TestHost;
use super::instance::InstanceVariant;
use super::invoker::{is_cancellation, TestInvoker};
use super::parameter::ParameterValue;
use crate::models::{TestFlags, TestResult, TestStatus};

/// Parameter value bound by an ancestor at capture time
#[derive(Clone, Debug)]
pub struct CapturedBinding {
    pub host: String,
    pub parameter: String,
    pub value: ParameterValue,
}

/// Named parameter values visible in `ctx`, outermost first.
///
/// When several ancestors declare the same parameter, the innermost wins.
pub fn snapshot(ctx: &TestContext) -> Vec<CapturedBinding> {
    let mut seen = HashSet::new();
    let mut bindings = Vec::new();

    for instance in ctx.instance_chain() {
        if instance.variant() == InstanceVariant::Fixture {
            continue;
        }
        let (Some(parameter), Some(value)) = (instance.parameter_name(), instance.current())
        else {
            continue;
        };
        if seen.insert(parameter.to_string()) {
            bindings.push(CapturedBinding {
                host: instance.host_name().to_string(),
                parameter: parameter.to_string(),
                value,
            });
        }
    }

    bindings.reverse();
    bindings
}

/// Freeze the values bound in `ctx` so `inner` can be re-run later, even
/// after the ancestors that produced them have been torn down
pub fn capture_context(
    ctx: &TestContext,
    name: impl Into<String>,
    inner: Arc<dyn TestInvoker>,
) -> CapturedInvoker {
    CapturedInvoker {
        name: name.into(),
        inner,
        bindings: Some(snapshot(ctx)),
    }
}

pub struct CapturedInvoker {
    name: String,
    inner: Arc<dyn TestInvoker>,
    /// Frozen bindings; `None` captures whatever is bound at invocation
    bindings: Option<Vec<CapturedBinding>>,
}

impl CapturedInvoker {
    pub fn new(name: impl Into<String>, inner: Arc<dyn TestInvoker>) -> Self {
        Self {
            name: name.into(),
            inner,
            bindings: None,
        }
    }

    pub fn bindings(&self) -> Option<&[CapturedBinding]> {
        self.bindings.as_deref()
    }

    async fn run_captured(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
        result: &mut TestResult,
    ) -> EngineResult<()> {
        let bindings = match &self.bindings {
            Some(bindings) => bindings.clone(),
            None => snapshot(ctx),
        };
        let hosts: Vec<TestHost> = bindings
            .into_iter()
            .map(|b| TestHost::captured(b.host, Some(b.parameter), b.value))
            .collect();

        let mut created = 0;
        let mut setup_failed = false;
        for host in &hosts {
            match host.create_instance(ctx, cancel).await {
                Ok(_) => created += 1,
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    result.add_child(failure(ctx, "SetUp", error));
                    setup_failed = true;
                    break;
                }
            }
        }

        let invoked = if setup_failed {
            Ok(())
        } else {
            self.inner
                .invoke(ctx, cancel)
                .await
                .map(|child| result.add_child(child))
        };

        for host in hosts[..created].iter().rev() {
            match host.destroy_instance(ctx, cancel).await {
                Ok(()) => {}
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => result.add_child(failure(ctx, "TearDown", error)),
            }
        }

        invoked
    }
}

fn failure(ctx: &TestContext, phase: &str, error: EngineError) -> TestResult {
    let name = ctx.name().child(phase);
    let error = anyhow::Error::from(error);
    if is_cancellation(&error) {
        TestResult::canceled(name)
    } else {
        TestResult::error(name, &error)
    }
}

#[async_trait]
impl TestInvoker for CapturedInvoker {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> TestFlags {
        self.inner.flags()
    }

    async fn invoke(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
    ) -> EngineResult<TestResult> {
        if ctx.name().is_captured() {
            ctx.debug(2, format_args!("{}: already captured", self.name));
            return self.inner.invoke(ctx, cancel).await;
        }

        let checkpoint = ctx.checkpoint();
        ctx.push_name(self.name.as_str());
        let previous = ctx.set_captured(true);
        let mut result = TestResult::new(ctx.name().clone());

        let ran = if cancel.is_cancelled() {
            result.set_status(TestStatus::Canceled);
            Ok(())
        } else {
            self.run_captured(ctx, cancel, &mut result).await
        };

        ctx.set_captured(previous);
        ctx.restore(checkpoint);
        ran?;

        if result.status() == TestStatus::None {
            result.set_status(TestStatus::Success);
        }
        Ok(result)
    }
}
