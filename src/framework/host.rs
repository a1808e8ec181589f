//! Test hosts
//!
//! A host creates at most one live instance at a time, swaps it into the
//! context and restores the previous instance when it is destroyed.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::TestContext;
use super::error::{EngineError, EngineResult};
use super::instance::{CustomInstanceFactory, Fixture, FixtureCtor, InstanceKind, TestInstance};
use super::parameter::{ParameterSource, ParameterValue};
use super::registry::{FactoryRef, SourceRef, BOOLEAN_SOURCE};
use crate::models::TestFlags;

/// How sibling children share the values of a parameterized host
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReusePolicy {
    /// For each value, run every child against it
    #[default]
    Shared,
    /// Each child gets its own pass over all values
    PerChild,
}

enum HostKind {
    Fixture(FixtureCtor),
    Parameterized {
        parameter: String,
        source: SourceRef,
        filter: Option<String>,
        reuse: ReusePolicy,
    },
    Captured {
        parameter: Option<String>,
        value: ParameterValue,
    },
    Custom(FactoryRef),
}

struct LiveInstance {
    instance: Arc<TestInstance>,
    saved_parent: Option<Arc<TestInstance>>,
}

pub struct TestHost {
    name: String,
    flags: TestFlags,
    kind: HostKind,
    live: Mutex<Option<LiveInstance>>,
}

impl TestHost {
    fn with_kind(name: impl Into<String>, kind: HostKind) -> Self {
        Self {
            name: name.into(),
            flags: TestFlags::empty(),
            kind,
            live: Mutex::new(None),
        }
    }

    /// Single-value host built by `ctor` on every outer run
    pub fn fixture<F>(name: impl Into<String>, ctor: F) -> Self
    where
        F: Fn(&TestContext) -> anyhow::Result<Fixture> + Send + Sync + 'static,
    {
        Self::with_kind(name, HostKind::Fixture(Arc::new(ctor)))
    }

    pub fn parameterized(
        name: impl Into<String>,
        parameter: impl Into<String>,
        source: impl ParameterSource + 'static,
    ) -> Self {
        let source: Arc<dyn ParameterSource> = Arc::new(source);
        Self::parameterized_with(name, parameter, SourceRef::Direct(source))
    }

    /// Parameterized host whose source is looked up in the registry at setup
    pub fn registered_parameter(
        name: impl Into<String>,
        parameter: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self::parameterized_with(name, parameter, SourceRef::Registered(source_id.into()))
    }

    pub fn boolean(parameter: impl Into<String>) -> Self {
        let parameter = parameter.into();
        Self::registered_parameter(parameter.clone(), parameter, BOOLEAN_SOURCE)
    }

    fn parameterized_with(
        name: impl Into<String>,
        parameter: impl Into<String>,
        source: SourceRef,
    ) -> Self {
        Self::with_kind(
            name,
            HostKind::Parameterized {
                parameter: parameter.into(),
                source,
                filter: None,
                reuse: ReusePolicy::default(),
            },
        )
    }

    /// Host re-exposing an already bound value
    pub fn captured(
        name: impl Into<String>,
        parameter: Option<String>,
        value: ParameterValue,
    ) -> Self {
        Self::with_kind(name, HostKind::Captured { parameter, value })
    }

    pub fn custom(name: impl Into<String>, factory: Arc<dyn CustomInstanceFactory>) -> Self {
        Self::with_kind(name, HostKind::Custom(FactoryRef::Explicit(factory)))
    }

    pub fn custom_registered(name: impl Into<String>, factory_id: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            HostKind::Custom(FactoryRef::Registered(factory_id.into())),
        )
    }

    /// Custom host using the factory of the nearest enclosing fixture
    pub fn custom_from_fixture(name: impl Into<String>) -> Self {
        Self::with_kind(name, HostKind::Custom(FactoryRef::NearestFixture))
    }

    pub fn with_flags(mut self, flags: TestFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Default filter for a parameterized host; a filter in the context settings wins
    pub fn with_filter(mut self, value: impl Into<String>) -> Self {
        if let HostKind::Parameterized { filter, .. } = &mut self.kind {
            *filter = Some(value.into());
        }
        self
    }

    pub fn with_reuse(mut self, policy: ReusePolicy) -> Self {
        if let HostKind::Parameterized { reuse, .. } = &mut self.kind {
            *reuse = policy;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> TestFlags {
        self.flags
    }

    pub fn reuse(&self) -> ReusePolicy {
        match &self.kind {
            HostKind::Parameterized { reuse, .. } => *reuse,
            _ => ReusePolicy::Shared,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        matches!(self.kind, HostKind::Parameterized { .. })
    }

    /// Name under which the bound value is visible to `TestContext::parameter`
    pub fn parameter_name(&self) -> Option<&str> {
        match &self.kind {
            HostKind::Parameterized { parameter, .. } => Some(parameter),
            HostKind::Captured { parameter, .. } => parameter.as_deref(),
            HostKind::Custom(_) => Some(&self.name),
            HostKind::Fixture(_) => None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.lock().is_some()
    }

    fn instance_kind(&self) -> InstanceKind {
        match &self.kind {
            HostKind::Fixture(ctor) => InstanceKind::fixture(Arc::clone(ctor)),
            HostKind::Parameterized { source, filter, .. } => {
                InstanceKind::parameterized(source.clone(), filter.clone())
            }
            HostKind::Captured { value, .. } => InstanceKind::captured(value.clone()),
            HostKind::Custom(factory) => InstanceKind::custom(factory.clone()),
        }
    }

    /// Create, install and initialize a new instance.
    ///
    /// On failure the context and the live slot are rolled back before the
    /// error is returned.
    pub async fn create_instance(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
    ) -> EngineResult<Arc<TestInstance>> {
        let saved_parent = ctx.current_instance().cloned();
        let instance = {
            let mut live = self.live.lock();
            if live.is_some() {
                return Err(EngineError::HostInUse {
                    host: self.name.clone(),
                });
            }

            let instance = Arc::new(TestInstance::new(
                self.name.clone(),
                self.parameter_name().map(str::to_string),
                saved_parent.as_ref(),
                self.instance_kind(),
            ));
            *live = Some(LiveInstance {
                instance: Arc::clone(&instance),
                saved_parent: saved_parent.clone(),
            });
            instance
        };

        ctx.set_current_instance(Some(Arc::clone(&instance)));
        ctx.debug(3, format_args!("{}: created {instance}", self.name));

        if let Err(source) = instance.initialize(ctx, cancel).await {
            ctx.set_current_instance(saved_parent);
            self.live.lock().take();
            return Err(EngineError::Setup {
                host: self.name.clone(),
                source,
            });
        }

        Ok(instance)
    }

    /// Destroy the live instance and restore the saved parent.
    ///
    /// The context is restored even when the instance fails to destroy; that
    /// failure is still returned.
    pub async fn destroy_instance(
        &self,
        ctx: &mut TestContext,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let (instance, saved_parent) = {
            let live = self.live.lock();
            match live.as_ref() {
                Some(live) if ctx.is_current(&live.instance) => {
                    (Arc::clone(&live.instance), live.saved_parent.clone())
                }
                _ => {
                    return Err(EngineError::InstanceMismatch {
                        host: self.name.clone(),
                    })
                }
            }
        };

        let destroyed = instance.destroy(ctx, cancel).await;

        ctx.set_current_instance(saved_parent);
        self.live.lock().take();
        ctx.debug(3, format_args!("{}: destroyed {instance}", self.name));

        destroyed.map_err(|source| EngineError::Teardown {
            host: self.name.clone(),
            source,
        })
    }
}

impl fmt::Debug for TestHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestHost")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("enumerable", &self.is_enumerable())
            .field("live", &self.is_live())
            .finish()
    }
}
