//! Hierarchical test names
//!
//! A name is a path of segments such as `Suite.Case(flag=true).Check`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of a test name
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSegment {
    Name(String),
    Parameter { name: String, value: String },
}

/// Dotted name path with parameter segments
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestName {
    segments: Vec<NameSegment>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    captured: bool,
}

impl TestName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            segments: vec![NameSegment::Name(name.into())],
            captured: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[NameSegment] {
        &self.segments
    }

    pub fn push_name(&mut self, name: impl Into<String>) {
        self.segments.push(NameSegment::Name(name.into()));
    }

    pub fn push_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.segments.push(NameSegment::Parameter {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Remove the last segment
    pub fn pop(&mut self) -> Option<NameSegment> {
        self.segments.pop()
    }

    /// Copy of this name with one more name segment
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.push_name(name);
        child
    }

    /// Segments after `parent`, or the whole name if `parent` is not a prefix
    pub fn relative_to(&self, parent: &TestName) -> TestName {
        let segments = match self.segments.strip_prefix(parent.segments.as_slice()) {
            Some(rest) if !rest.is_empty() => rest.to_vec(),
            _ => self.segments.clone(),
        };
        TestName {
            segments,
            captured: self.captured,
        }
    }

    /// Last plain name segment
    pub fn local_name(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|s| match s {
            NameSegment::Name(name) => Some(name.as_str()),
            NameSegment::Parameter { .. } => None,
        })
    }

    /// Parameters bound along the path, outermost first
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.segments.iter().filter_map(|s| match s {
            NameSegment::Parameter { name, value } => Some((name.as_str(), value.as_str())),
            NameSegment::Name(_) => None,
        })
    }

    /// Whether this name was synthesized by a context capture
    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn set_captured(&mut self, captured: bool) {
        self.captured = captured;
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut in_params = false;

        for segment in &self.segments {
            match segment {
                NameSegment::Name(name) => {
                    if in_params {
                        write!(f, ")")?;
                        in_params = false;
                    }
                    if !first {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                NameSegment::Parameter { name, value } => {
                    if in_params {
                        write!(f, ", ")?;
                    } else {
                        write!(f, "(")?;
                        in_params = true;
                    }
                    write!(f, "{name}={value}")?;
                }
            }
            first = false;
        }

        if in_params {
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_parameters() {
        let mut name = TestName::new("Suite");
        name.push_name("Case");
        name.push_parameter("flag", "true");
        name.push_parameter("mode", "fast");
        name.push_name("Check");

        assert_eq!(name.to_string(), "Suite.Case(flag=true, mode=fast).Check");
        assert_eq!(name.local_name(), Some("Check"));
    }

    #[test]
    fn test_push_pop_is_symmetric() {
        let mut name = TestName::new("Suite");
        let before = name.clone();

        name.push_name("SetUp");
        name.push_parameter("n", "1");
        name.pop();
        name.pop();

        assert_eq!(name, before);
    }

    #[test]
    fn test_relative_to() {
        let parent = TestName::new("Suite");
        let mut group = parent.clone();
        group.push_parameter("flag", "true");
        let child = group.child("Check");

        assert_eq!(group.relative_to(&parent).to_string(), "(flag=true)");
        assert_eq!(child.relative_to(&group).to_string(), "Check");
        assert_eq!(parent.relative_to(&child).to_string(), "Suite");
    }

    #[test]
    fn test_parameters() {
        let mut name = TestName::new("Suite");
        name.push_parameter("a", "1");
        name.push_name("Inner");
        name.push_parameter("b", "2");

        let params: Vec<_> = name.parameters().collect();
        assert_eq!(params, vec![("a", "1"), ("b", "2")]);
    }
}
