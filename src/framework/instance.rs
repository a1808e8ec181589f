//! Test instances
//!
//! An instance is the value bound by a host for one run. It comes in four
//! variants: a fixture with a single value, a parameterized cursor over a
//! materialized value list, a captured alias of an ancestor's value, and a
//! custom instance whose lifecycle is delegated to a user factory.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

use super::context::TestContext;
use super::error::{check_canceled, EngineError};
use super::invoker::panic_message;
use super::parameter::{ParameterSource, ParameterValue};
use super::registry::{FactoryRef, SourceRef};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Builds the value of a fixture host
pub type FixtureCtor = Arc<dyn Fn(&TestContext) -> anyhow::Result<Fixture> + Send + Sync>;

/// Externally supplied instance lifecycle.
///
/// The engine looks the factory up and forwards each lifecycle step to it.
#[async_trait]
pub trait CustomInstanceFactory: Send + Sync {
    async fn initialize(
        &self,
        ctx: &TestContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ParameterValue>;

    async fn pre_run(
        &self,
        _ctx: &TestContext,
        _value: &ParameterValue,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_run(
        &self,
        _ctx: &TestContext,
        _value: &ParameterValue,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn destroy(
        &self,
        _ctx: &TestContext,
        _value: &ParameterValue,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Value bound by a fixture host, optionally exposing a custom factory
#[derive(Clone)]
pub struct Fixture {
    value: ParameterValue,
    factory: Option<Arc<dyn CustomInstanceFactory>>,
}

impl Fixture {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_value(ParameterValue::with_identifier(
            std::any::type_name::<T>(),
            value,
        ))
    }

    pub fn from_value(value: ParameterValue) -> Self {
        Self {
            value,
            factory: None,
        }
    }

    /// Let nested custom hosts use `factory`
    pub fn with_factory(mut self, factory: Arc<dyn CustomInstanceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }
}

/// Instance variant tag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceVariant {
    Fixture,
    Parameterized,
    Captured,
    Custom,
}

impl fmt::Display for InstanceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceVariant::Fixture => write!(f, "Fixture"),
            InstanceVariant::Parameterized => write!(f, "Parameterized"),
            InstanceVariant::Captured => write!(f, "Captured"),
            InstanceVariant::Custom => write!(f, "Custom"),
        }
    }
}

#[derive(Default)]
pub(crate) struct Cursor {
    values: Option<Vec<ParameterValue>>,
    index: usize,
    current: Option<ParameterValue>,
}

pub(crate) enum InstanceKind {
    Fixture {
        ctor: FixtureCtor,
        bound: Mutex<Option<Fixture>>,
    },
    Parameterized {
        source: SourceRef,
        filter: Option<String>,
        cursor: Mutex<Cursor>,
    },
    /// Borrowed value; the owning instance elsewhere releases it
    Captured { value: ParameterValue },
    Custom {
        factory: FactoryRef,
        bound: Mutex<Option<(Arc<dyn CustomInstanceFactory>, ParameterValue)>>,
    },
}

impl InstanceKind {
    pub(crate) fn fixture(ctor: FixtureCtor) -> Self {
        InstanceKind::Fixture {
            ctor,
            bound: Mutex::new(None),
        }
    }

    pub(crate) fn parameterized(source: SourceRef, filter: Option<String>) -> Self {
        InstanceKind::Parameterized {
            source,
            filter,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub(crate) fn captured(value: ParameterValue) -> Self {
        InstanceKind::Captured { value }
    }

    pub(crate) fn custom(factory: FactoryRef) -> Self {
        InstanceKind::Custom {
            factory,
            bound: Mutex::new(None),
        }
    }
}

/// A live instance created by a host
pub struct TestInstance {
    id: u64,
    host: String,
    parameter: Option<String>,
    parent: Option<Weak<TestInstance>>,
    kind: InstanceKind,
}

impl TestInstance {
    pub(crate) fn new(
        host: impl Into<String>,
        parameter: Option<String>,
        parent: Option<&Arc<TestInstance>>,
        kind: InstanceKind,
    ) -> Self {
        Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            host: host.into(),
            parameter,
            parent: parent.map(Arc::downgrade),
            kind,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host_name(&self) -> &str {
        &self.host
    }

    pub fn parameter_name(&self) -> Option<&str> {
        self.parameter.as_deref()
    }

    pub fn variant(&self) -> InstanceVariant {
        match self.kind {
            InstanceKind::Fixture { .. } => InstanceVariant::Fixture,
            InstanceKind::Parameterized { .. } => InstanceVariant::Parameterized,
            InstanceKind::Captured { .. } => InstanceVariant::Captured,
            InstanceKind::Custom { .. } => InstanceVariant::Custom,
        }
    }

    pub fn is_fixture(&self) -> bool {
        self.variant() == InstanceVariant::Fixture
    }

    pub fn is_enumerable(&self) -> bool {
        self.variant() == InstanceVariant::Parameterized
    }

    /// Enclosing instance, if it is still alive
    pub fn parent(&self) -> Option<Arc<TestInstance>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Currently bound value
    pub fn current(&self) -> Option<ParameterValue> {
        match &self.kind {
            InstanceKind::Fixture { bound, .. } => bound.lock().as_ref().map(|f| f.value.clone()),
            InstanceKind::Parameterized { cursor, .. } => cursor.lock().current.clone(),
            InstanceKind::Captured { value } => Some(value.clone()),
            InstanceKind::Custom { bound, .. } => bound.lock().as_ref().map(|(_, v)| v.clone()),
        }
    }

    pub fn has_next(&self) -> bool {
        match &self.kind {
            InstanceKind::Parameterized { cursor, .. } => {
                let cursor = cursor.lock();
                cursor
                    .values
                    .as_ref()
                    .map(|values| cursor.index < values.len())
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Position of the current value in the materialized sequence
    pub fn current_index(&self) -> Option<usize> {
        match &self.kind {
            InstanceKind::Parameterized { cursor, .. } => {
                let cursor = cursor.lock();
                cursor.current.as_ref().map(|_| cursor.index - 1)
            }
            _ => None,
        }
    }

    /// Number of materialized values
    pub fn len(&self) -> Option<usize> {
        match &self.kind {
            InstanceKind::Parameterized { cursor, .. } => {
                cursor.lock().values.as_ref().map(Vec::len)
            }
            _ => None,
        }
    }

    /// Move the cursor back before the first value without consuming the source again
    pub fn rewind(&self) {
        if let InstanceKind::Parameterized { cursor, .. } = &self.kind {
            let mut cursor = cursor.lock();
            cursor.index = 0;
            cursor.current = None;
        }
    }

    pub(crate) fn fixture_factory(&self) -> Option<Arc<dyn CustomInstanceFactory>> {
        match &self.kind {
            InstanceKind::Fixture { bound, .. } => {
                bound.lock().as_ref().and_then(|f| f.factory.clone())
            }
            _ => None,
        }
    }

    pub async fn initialize(
        &self,
        ctx: &TestContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        check_canceled(cancel)?;
        ctx.debug(4, format_args!("Initialize {self}"));
        unwind_to_error("initialize", self.bind(ctx, cancel)).await
    }

    async fn bind(&self, ctx: &TestContext, cancel: &CancellationToken) -> anyhow::Result<()> {
        match &self.kind {
            InstanceKind::Fixture { ctor, bound } => {
                let fixture = ctor(ctx)?;
                *bound.lock() = Some(fixture);
            }
            InstanceKind::Parameterized {
                source,
                filter,
                cursor,
            } => {
                let source = self.resolve_source(ctx, source)?;
                let filter = self
                    .parameter
                    .as_deref()
                    .and_then(|p| ctx.settings().filter_for(p))
                    .or(filter.as_deref());
                let values = source.parameters(ctx, filter)?;
                ctx.debug(
                    4,
                    format_args!("{self}: materialized {} values", values.len()),
                );
                *cursor.lock() = Cursor {
                    values: Some(values),
                    index: 0,
                    current: None,
                };
            }
            InstanceKind::Captured { .. } => {}
            InstanceKind::Custom { factory, bound } => {
                let factory = self.resolve_factory(ctx, factory)?;
                let value = factory.initialize(ctx, cancel).await?;
                *bound.lock() = Some((factory, value));
            }
        }

        Ok(())
    }

    pub async fn pre_run(&self, ctx: &TestContext, cancel: &CancellationToken) -> anyhow::Result<()> {
        check_canceled(cancel)?;
        if let Some((factory, value)) = self.custom_binding() {
            unwind_to_error("pre_run", factory.pre_run(ctx, &value, cancel)).await?;
        }
        Ok(())
    }

    /// Runs after the children for a value, even when they failed or were canceled
    pub async fn post_run(
        &self,
        ctx: &TestContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if let Some((factory, value)) = self.custom_binding() {
            unwind_to_error("post_run", factory.post_run(ctx, &value, cancel)).await?;
        }
        Ok(())
    }

    /// Advance to the next value; `false` once the sequence is exhausted
    pub async fn move_next(
        &self,
        ctx: &TestContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<bool> {
        check_canceled(cancel)?;

        let InstanceKind::Parameterized { cursor, .. } = &self.kind else {
            return Ok(false);
        };

        let mut cursor = cursor.lock();
        let next = match cursor.values.as_ref() {
            Some(values) => values.get(cursor.index).cloned(),
            None => anyhow::bail!("{self} has not been initialized"),
        };

        match next {
            Some(value) => {
                ctx.debug(5, format_args!("{self}: moved to {value}"));
                cursor.index += 1;
                cursor.current = Some(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release the bound value; always attempted, even after cancellation
    pub async fn destroy(&self, ctx: &TestContext, cancel: &CancellationToken) -> anyhow::Result<()> {
        ctx.debug(4, format_args!("Destroy {self}"));

        match &self.kind {
            InstanceKind::Fixture { bound, .. } => {
                bound.lock().take();
            }
            InstanceKind::Parameterized { cursor, .. } => {
                *cursor.lock() = Cursor::default();
            }
            InstanceKind::Captured { .. } => {}
            InstanceKind::Custom { bound, .. } => {
                let binding = bound.lock().take();
                if let Some((factory, value)) = binding {
                    unwind_to_error("destroy", factory.destroy(ctx, &value, cancel)).await?;
                }
            }
        }

        Ok(())
    }

    fn custom_binding(&self) -> Option<(Arc<dyn CustomInstanceFactory>, ParameterValue)> {
        match &self.kind {
            InstanceKind::Custom { bound, .. } => bound.lock().clone(),
            _ => None,
        }
    }

    fn resolve_source(
        &self,
        ctx: &TestContext,
        source: &SourceRef,
    ) -> Result<Arc<dyn ParameterSource>, EngineError> {
        match source {
            SourceRef::Direct(source) => Ok(Arc::clone(source)),
            SourceRef::Registered(id) => ctx
                .registry()
                .source(id)
                .ok_or_else(|| EngineError::UnknownSource(id.clone())),
        }
    }

    fn resolve_factory(
        &self,
        ctx: &TestContext,
        factory: &FactoryRef,
    ) -> Result<Arc<dyn CustomInstanceFactory>, EngineError> {
        match factory {
            FactoryRef::Explicit(factory) => Ok(Arc::clone(factory)),
            FactoryRef::Registered(id) => ctx
                .registry()
                .factory(id)
                .ok_or_else(|| EngineError::NoFactory(self.host.clone())),
            FactoryRef::NearestFixture => {
                let mut next = self.parent();
                while let Some(instance) = next {
                    if let Some(factory) = instance.fixture_factory() {
                        return Ok(factory);
                    }
                    next = instance.parent();
                }
                Err(EngineError::NoFactory(self.host.clone()))
            }
        }
    }
}

impl fmt::Display for TestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}({}): host={}", self.variant(), self.id, self.host)?;
        if let Some(parent) = self.parent() {
            write!(f, ", parent={}", parent.id)?;
        }
        write!(f, "]")
    }
}

impl fmt::Debug for TestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Turn a panic inside a lifecycle step into an ordinary error
async fn unwind_to_error<T>(
    step: &str,
    future: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "{step} panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}
