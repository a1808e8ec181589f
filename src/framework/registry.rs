//! Explicit registry of parameter sources and custom instance factories
//!
//! Hosts may name a source or factory by identifier; the identifier is
//! resolved against the registry when the instance is initialized.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::instance::CustomInstanceFactory;
use super::parameter::{BooleanSource, ParameterSource};

/// Identifier under which [`BooleanSource`] is registered by default
pub const BOOLEAN_SOURCE: &str = "bool";

/// How a parameterized host finds its source
#[derive(Clone)]
pub enum SourceRef {
    Direct(Arc<dyn ParameterSource>),
    Registered(String),
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Direct(_) => write!(f, "Direct"),
            SourceRef::Registered(id) => write!(f, "Registered({id})"),
        }
    }
}

/// How a custom host finds its factory
#[derive(Clone)]
pub enum FactoryRef {
    Explicit(Arc<dyn CustomInstanceFactory>),
    Registered(String),
    /// Nearest enclosing fixture instance that exposes a factory
    NearestFixture,
}

impl fmt::Debug for FactoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryRef::Explicit(_) => write!(f, "Explicit"),
            FactoryRef::Registered(id) => write!(f, "Registered({id})"),
            FactoryRef::NearestFixture => write!(f, "NearestFixture"),
        }
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    sources: HashMap<String, Arc<dyn ParameterSource>>,
    factories: HashMap<String, Arc<dyn CustomInstanceFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in sources
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_source(BOOLEAN_SOURCE, BooleanSource);
        registry
    }

    pub fn register_source(
        &mut self,
        id: impl Into<String>,
        source: impl ParameterSource + 'static,
    ) -> &mut Self {
        self.sources.insert(id.into(), Arc::new(source));
        self
    }

    pub fn register_factory(
        &mut self,
        id: impl Into<String>,
        factory: Arc<dyn CustomInstanceFactory>,
    ) -> &mut Self {
        self.factories.insert(id.into(), factory);
        self
    }

    pub fn source(&self, id: &str) -> Option<Arc<dyn ParameterSource>> {
        self.sources.get(id).cloned()
    }

    pub fn factory(&self, id: &str) -> Option<Arc<dyn CustomInstanceFactory>> {
        self.factories.get(id).cloned()
    }

    pub fn source_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.sources.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut factories: Vec<_> = self.factories.keys().collect();
        factories.sort_unstable();
        f.debug_struct("Registry")
            .field("sources", &self.source_ids())
            .field("factories", &factories)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::parameter::ListSource;

    #[test]
    fn test_builtins() {
        let registry = Registry::with_builtins();
        assert!(registry.source(BOOLEAN_SOURCE).is_some());
        assert!(registry.source("missing").is_none());
    }

    #[test]
    fn test_register_source() {
        let mut registry = Registry::new();
        registry
            .register_source("versions", ListSource::new([1, 2]))
            .register_source("modes", ListSource::new(["a"]));

        assert_eq!(registry.source_ids(), vec!["modes", "versions"]);
    }
}
