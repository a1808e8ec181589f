//! Parameter values and parameter sources
//!
//! A parameter source produces the finite, ordered value sequence that a
//! parameterized instance enumerates.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::context::TestContext;

/// Type-erased value bound by an instance
#[derive(Clone)]
pub struct ParameterValue {
    identifier: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl ParameterValue {
    /// Wrap a displayable value, using its display form as identifier
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Display,
    {
        Self {
            identifier: value.to_string(),
            value: Arc::new(value),
        }
    }

    pub fn with_identifier<T>(identifier: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            identifier: identifier.into(),
            value: Arc::new(value),
        }
    }

    /// Wrap an already shared value
    pub fn from_arc(identifier: impl Into<String>, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            identifier: identifier.into(),
            value,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Shared handle to the value, if it is a `T`
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Both handles point at the same underlying value
    pub fn same_value(&self, other: &ParameterValue) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParameterValue")
            .field(&self.identifier)
            .finish()
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}

/// Produces the values for a parameterized host
pub trait ParameterSource: Send + Sync {
    fn parameters(
        &self,
        ctx: &TestContext,
        filter: Option<&str>,
    ) -> anyhow::Result<Vec<ParameterValue>>;
}

/// Keep only values whose identifier is listed in a comma-separated filter
pub fn apply_filter(values: Vec<ParameterValue>, filter: Option<&str>) -> Vec<ParameterValue> {
    let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
        return values;
    };

    let wanted: Vec<&str> = filter.split(',').map(str::trim).collect();
    values
        .into_iter()
        .filter(|v| wanted.contains(&v.identifier()))
        .collect()
}

/// `false`, then `true`
#[derive(Clone, Copy, Debug, Default)]
pub struct BooleanSource;

impl ParameterSource for BooleanSource {
    fn parameters(
        &self,
        _ctx: &TestContext,
        filter: Option<&str>,
    ) -> anyhow::Result<Vec<ParameterValue>> {
        let values = vec![ParameterValue::new(false), ParameterValue::new(true)];
        Ok(apply_filter(values, filter))
    }
}

/// Fixed list of values
#[derive(Clone, Debug, Default)]
pub struct ListSource {
    values: Vec<ParameterValue>,
}

impl ListSource {
    pub fn new<T, I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Any + Send + Sync + fmt::Display,
    {
        Self {
            values: values.into_iter().map(ParameterValue::new).collect(),
        }
    }

    pub fn from_values(values: Vec<ParameterValue>) -> Self {
        Self { values }
    }
}

impl ParameterSource for ListSource {
    fn parameters(
        &self,
        _ctx: &TestContext,
        filter: Option<&str>,
    ) -> anyhow::Result<Vec<ParameterValue>> {
        Ok(apply_filter(self.values.clone(), filter))
    }
}

/// Source backed by a closure
pub struct FnSource<F> {
    f: F,
}

impl<F> FnSource<F>
where
    F: Fn(&TestContext, Option<&str>) -> anyhow::Result<Vec<ParameterValue>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ParameterSource for FnSource<F>
where
    F: Fn(&TestContext, Option<&str>) -> anyhow::Result<Vec<ParameterValue>> + Send + Sync,
{
    fn parameters(
        &self,
        ctx: &TestContext,
        filter: Option<&str>,
    ) -> anyhow::Result<Vec<ParameterValue>> {
        (self.f)(ctx, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifiers(values: &[ParameterValue]) -> Vec<&str> {
        values.iter().map(|v| v.identifier()).collect()
    }

    #[test]
    fn test_boolean_source_order() {
        let ctx = TestContext::default();
        let values = BooleanSource.parameters(&ctx, None).unwrap();
        assert_eq!(identifiers(&values), vec!["false", "true"]);
        assert_eq!(values[1].get::<bool>(), Some(&true));
    }

    #[test]
    fn test_list_source_filter() {
        let ctx = TestContext::default();
        let source = ListSource::new(["tls12", "tls13", "ssl3"]);

        let values = source.parameters(&ctx, Some("tls13, ssl3")).unwrap();
        assert_eq!(identifiers(&values), vec!["tls13", "ssl3"]);

        let all = source.parameters(&ctx, Some("  ")).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_value_downcast() {
        let value = ParameterValue::new(42u16);
        assert_eq!(value.get::<u16>(), Some(&42));
        assert!(value.get::<u32>().is_none());
        assert!(value.same_value(&value.clone()));
    }
}
