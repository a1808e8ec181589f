//! Runnable test suites
//!
//! Suites are registered explicitly at program start. Each entry builds a
//! fresh top-level invoker on demand.

mod builtin;

use std::fmt;
use std::sync::Arc;

use crate::framework::{InvokerBuilder, Registry, TestInvoker};
use crate::models::TestFlags;

pub use builtin::register_builtins;

/// A registered top-level suite
#[derive(Clone)]
pub struct Suite {
    name: String,
    description: String,
    flags: TestFlags,
    builder: InvokerBuilder,
}

impl Suite {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, builder: F) -> Self
    where
        F: Fn() -> Arc<dyn TestInvoker> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            flags: TestFlags::BROWSABLE,
            builder: Arc::new(builder),
        }
    }

    pub fn with_flags(mut self, flags: TestFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.is_hidden()
    }

    /// Fresh invoker tree for one run
    pub fn build(&self) -> Arc<dyn TestInvoker> {
        (self.builder)()
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Suites plus the parameter sources and factories they refer to
#[derive(Debug)]
pub struct SuiteRegistry {
    suites: Vec<Suite>,
    registry: Registry,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self {
            suites: Vec::new(),
            registry: Registry::with_builtins(),
        }
    }

    /// Registry populated with the bundled suites
    pub fn with_builtins() -> Self {
        let mut suites = Self::new();
        register_builtins(&mut suites);
        suites
    }

    /// Add a suite; a suite with the same name is replaced
    pub fn register(&mut self, suite: Suite) -> &mut Self {
        if let Some(existing) = self.suites.iter_mut().find(|s| s.name == suite.name) {
            *existing = suite;
        } else {
            self.suites.push(suite);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Suite> {
        self.suites
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Suites in registration order
    pub fn list(&self, include_hidden: bool) -> Vec<&Suite> {
        self.suites
            .iter()
            .filter(|s| include_hidden || !s.is_hidden())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.suites.iter().map(|s| s.name.as_str()).collect()
    }

    /// Resolve suite names, or every visible suite when `names` is empty
    pub fn resolve(&self, names: &[String]) -> anyhow::Result<Vec<Suite>> {
        if names.is_empty() {
            return Ok(self.list(false).into_iter().cloned().collect());
        }

        names
            .iter()
            .map(|name| {
                self.get(name).cloned().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown suite: {name} (available: {})",
                        self.names().join(", ")
                    )
                })
            })
            .collect()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }
}

impl Default for SuiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}
