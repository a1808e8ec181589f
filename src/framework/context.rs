//! Execution context
//!
//! The context carries the current instance, the name path, the active
//! result scope and the logging sink through every engine call. Nested
//! scopes save and restore it in strict stack order.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::instance::TestInstance;
use super::parameter::ParameterValue;
use super::registry::Registry;
use crate::models::TestName;

/// Settings shared by every context of a run
#[derive(Clone, Debug, Default)]
pub struct ContextSettings {
    /// Diagnostics up to this level are emitted through `tracing`
    pub debug_level: u8,
    /// Parameter filters keyed by parameter name
    pub filters: HashMap<String, String>,
    pub categories: CategoryFilter,
}

impl ContextSettings {
    pub fn with_debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    pub fn with_filter(mut self, parameter: impl Into<String>, filter: impl Into<String>) -> Self {
        self.filters.insert(parameter.into(), filter.into());
        self
    }

    pub fn filter_for(&self, parameter: &str) -> Option<&str> {
        self.filters.get(parameter).map(String::as_str)
    }

    pub fn include_category(mut self, category: impl Into<String>) -> Self {
        self.categories.include.insert(category.into());
        self
    }

    pub fn exclude_category(mut self, category: impl Into<String>) -> Self {
        self.categories.exclude.insert(category.into());
        self
    }
}

/// Category selection for a run.
///
/// Categories are inherited: a test carries its own categories plus those of
/// every invoker enclosing it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    /// When non-empty, only tests tagged with one of these run
    pub include: BTreeSet<String>,
    /// Tests tagged with any of these never run
    pub exclude: BTreeSet<String>,
}

impl CategoryFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Why a test tagged with `categories` is skipped, if it is.
    ///
    /// Exclusion is checked at every level so a whole subtree is skipped
    /// before its setup runs. Inclusion is only decided where a body runs.
    pub fn skip_reason(&self, categories: &[String], leaf: bool) -> Option<String> {
        if let Some(category) = categories.iter().find(|c| self.exclude.contains(*c)) {
            return Some(format!("category `{category}` is excluded"));
        }

        if leaf
            && !self.include.is_empty()
            && !categories.iter().any(|c| self.include.contains(c))
        {
            return Some("not in the selected categories".to_string());
        }

        None
    }
}

/// Message buffer collecting log output for the result being built
#[derive(Clone, Debug, Default)]
struct ResultScope {
    messages: Arc<Mutex<Vec<String>>>,
}

/// Snapshot of the context's stacks, used to recover from a panicking child
#[derive(Clone)]
pub(crate) struct ContextCheckpoint {
    name: TestName,
    scopes: usize,
    categories: usize,
    instance: Option<Arc<TestInstance>>,
}

/// Ambient state threaded through a test run
#[derive(Clone)]
pub struct TestContext {
    name: TestName,
    instance: Option<Arc<TestInstance>>,
    scopes: Vec<ResultScope>,
    categories: Vec<String>,
    settings: Arc<ContextSettings>,
    registry: Arc<Registry>,
    fork_index: Option<usize>,
}

impl TestContext {
    pub fn new(settings: ContextSettings, registry: Arc<Registry>) -> Self {
        Self {
            name: TestName::empty(),
            instance: None,
            scopes: vec![ResultScope::default()],
            categories: Vec::new(),
            settings: Arc::new(settings),
            registry,
            fork_index: None,
        }
    }

    pub fn name(&self) -> &TestName {
        &self.name
    }

    pub fn push_name(&mut self, name: impl Into<String>) {
        self.name.push_name(name);
    }

    pub fn push_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.name.push_parameter(name, value);
    }

    pub fn pop_name(&mut self) {
        self.name.pop();
    }

    /// Mark the name path as captured, returning the previous marker
    pub(crate) fn set_captured(&mut self, captured: bool) -> bool {
        let previous = self.name.is_captured();
        self.name.set_captured(captured);
        previous
    }

    /// Categories of the current test and the invokers enclosing it
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Add an invoker's categories to the path; returns why it is filtered out, if it is
    pub(crate) fn enter_categories(&mut self, own: &[String], leaf: bool) -> Option<String> {
        self.categories.extend(own.iter().cloned());
        self.settings.categories.skip_reason(&self.categories, leaf)
    }

    pub(crate) fn leave_categories(&mut self, depth: usize) {
        self.categories.truncate(depth);
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Index of the forked copy this context belongs to, if any
    pub fn fork_index(&self) -> Option<usize> {
        self.fork_index
    }

    pub fn current_instance(&self) -> Option<&Arc<TestInstance>> {
        self.instance.as_ref()
    }

    pub(crate) fn set_current_instance(&mut self, instance: Option<Arc<TestInstance>>) {
        self.instance = instance;
    }

    /// Whether `instance` is exactly the current instance
    pub fn is_current(&self, instance: &Arc<TestInstance>) -> bool {
        self.instance
            .as_ref()
            .map(|current| Arc::ptr_eq(current, instance))
            .unwrap_or(false)
    }

    /// The current instance followed by its ancestors, innermost first
    pub fn instance_chain(&self) -> Vec<Arc<TestInstance>> {
        let mut chain = Vec::new();
        let mut next = self.instance.clone();
        while let Some(instance) = next {
            next = instance.parent();
            chain.push(instance);
        }
        chain
    }

    /// Value bound to the nearest instance declaring parameter `name`
    pub fn parameter(&self, name: &str) -> Option<ParameterValue> {
        self.instance_chain()
            .into_iter()
            .find(|i| i.parameter_name() == Some(name))
            .and_then(|i| i.current())
    }

    pub fn parameter_as<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.parameter(name).and_then(|v| v.get::<T>().cloned())
    }

    /// Value of the nearest fixture instance holding a `T`
    pub fn fixture<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.instance_chain()
            .into_iter()
            .filter(|i| i.is_fixture())
            .filter_map(|i| i.current())
            .find_map(|v| v.downcast_arc::<T>())
    }

    /// Log a message into the result being built
    pub fn log(&self, message: impl fmt::Display) {
        let message = message.to_string();
        info!(test = %self.name, "{message}");
        if let Some(scope) = self.scopes.last() {
            scope.messages.lock().push(message);
        }
    }

    /// Emit an engine diagnostic when `level` is within the configured debug level
    pub fn debug(&self, level: u8, message: impl fmt::Display) {
        if level <= self.settings.debug_level {
            debug!(test = %self.name, debug_level = level, "{message}");
        }
    }

    pub(crate) fn push_result_scope(&mut self) {
        self.scopes.push(ResultScope::default());
    }

    /// Close the innermost result scope and hand back its messages
    pub(crate) fn pop_result_scope(&mut self) -> Vec<String> {
        if self.scopes.len() <= 1 {
            let root = &self.scopes[0];
            return std::mem::take(&mut *root.messages.lock());
        }

        self.scopes
            .pop()
            .map(|scope| std::mem::take(&mut *scope.messages.lock()))
            .unwrap_or_default()
    }

    pub(crate) fn checkpoint(&self) -> ContextCheckpoint {
        ContextCheckpoint {
            name: self.name.clone(),
            scopes: self.scopes.len(),
            categories: self.categories.len(),
            instance: self.instance.clone(),
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: ContextCheckpoint) {
        self.name = checkpoint.name;
        self.scopes.truncate(checkpoint.scopes.max(1));
        self.categories.truncate(checkpoint.categories);
        self.instance = checkpoint.instance;
    }

    /// Independent context for a forked copy of a subtree
    pub fn fork(&self, index: usize) -> TestContext {
        TestContext {
            name: self.name.clone(),
            instance: self.instance.clone(),
            scopes: vec![ResultScope::default()],
            categories: self.categories.clone(),
            settings: Arc::clone(&self.settings),
            registry: Arc::clone(&self.registry),
            fork_index: Some(index),
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new(ContextSettings::default(), Arc::new(Registry::with_builtins()))
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("name", &self.name.to_string())
            .field("instance", &self.instance)
            .field("scopes", &self.scopes.len())
            .field("fork_index", &self.fork_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_goes_to_innermost_scope() {
        let mut ctx = TestContext::default();
        ctx.log("outer");
        ctx.push_result_scope();
        ctx.log("inner");

        assert_eq!(ctx.pop_result_scope(), vec!["inner".to_string()]);
        assert_eq!(ctx.pop_result_scope(), vec!["outer".to_string()]);
    }

    #[test]
    fn test_clone_shares_scope() {
        let mut ctx = TestContext::default();
        ctx.push_result_scope();
        let body_ctx = ctx.clone();
        body_ctx.log("from body");

        assert_eq!(ctx.pop_result_scope(), vec!["from body".to_string()]);
    }

    #[test]
    fn test_checkpoint_restore() {
        let mut ctx = TestContext::default();
        ctx.push_name("Suite");
        let checkpoint = ctx.checkpoint();

        ctx.push_name("Inner");
        ctx.push_result_scope();
        ctx.push_result_scope();
        ctx.restore(checkpoint);

        assert_eq!(ctx.name().to_string(), "Suite");
        assert_eq!(ctx.scopes.len(), 1);
    }

    #[test]
    fn test_captured_marker_round_trip() {
        let mut ctx = TestContext::default();
        ctx.push_name("Suite");

        let previous = ctx.set_captured(true);
        assert!(!previous);
        assert!(ctx.name().is_captured());

        ctx.set_captured(previous);
        assert!(!ctx.name().is_captured());
        assert_eq!(ctx.name().to_string(), "Suite");
    }

    #[test]
    fn test_settings_filters() {
        let settings = ContextSettings::default()
            .with_debug_level(2)
            .with_filter("protocol", "tls13");
        assert_eq!(settings.filter_for("protocol"), Some("tls13"));
        assert_eq!(settings.filter_for("other"), None);
    }

    #[test]
    fn test_category_filter() {
        let filter = ContextSettings::default()
            .include_category("tls")
            .exclude_category("slow")
            .categories;
        let tags = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();

        assert!(filter.skip_reason(&tags(&["tls"]), true).is_none());
        assert!(filter.skip_reason(&tags(&["tls", "slow"]), true).is_some());
        assert!(filter.skip_reason(&tags(&[]), true).is_some());
        assert!(filter.skip_reason(&tags(&[]), false).is_none());
        assert!(CategoryFilter::default().skip_reason(&tags(&["slow"]), true).is_none());
    }

    #[test]
    fn test_categories_are_inherited_and_restored() {
        let settings = ContextSettings::default().exclude_category("slow");
        let mut ctx = TestContext::new(settings, Arc::new(Registry::with_builtins()));
        let checkpoint = ctx.checkpoint();

        assert!(ctx.enter_categories(&["slow".to_string()], false).is_some());
        assert!(ctx.enter_categories(&[], true).is_some());
        assert_eq!(ctx.fork(0).categories(), ["slow".to_string()]);

        ctx.restore(checkpoint);
        assert!(ctx.categories().is_empty());
        assert!(ctx.enter_categories(&[], true).is_none());
    }
}
