//! Test result models
//!
//! Defines the hierarchical result tree produced by a test run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::TestName;

/// Test execution status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Not finalized yet
    #[default]
    None,
    Success,
    Error,
    Ignored,
    Canceled,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::None => "·",
            TestStatus::Success => "✓",
            TestStatus::Error => "✗",
            TestStatus::Ignored => "○",
            TestStatus::Canceled => "⊘",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Success)
    }

    /// Combine a child status into this (parent) status.
    ///
    /// `Error` and `Canceled` are sticky, `None` and `Ignored` adopt whatever the
    /// child reports, and `Success` only degrades.
    pub fn merge(self, child: TestStatus) -> TestStatus {
        if child == TestStatus::None {
            return self;
        }

        match self {
            TestStatus::Canceled | TestStatus::Error => self,
            TestStatus::None | TestStatus::Ignored => child,
            TestStatus::Success => match child {
                TestStatus::Error | TestStatus::Canceled => child,
                _ => self,
            },
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::None => write!(f, "NONE"),
            TestStatus::Success => write!(f, "PASS"),
            TestStatus::Error => write!(f, "ERROR"),
            TestStatus::Ignored => write!(f, "IGNORED"),
            TestStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Error payload attached to a result node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error together with its source chain
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            causes: error.chain().skip(1).map(|e| e.to_string()).collect(),
        }
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// A node of the result tree.
///
/// Children are moved into their parent by [`TestResult::add_child`], so once a
/// node has been appended it can only change through the node that owns it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub name: TestName,
    status: TestStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<TestResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    errors: Vec<TestError>,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn new(name: TestName) -> Self {
        Self::with_status(name, TestStatus::None)
    }

    pub fn with_status(name: TestName, status: TestStatus) -> Self {
        Self {
            name,
            status,
            children: Vec::new(),
            messages: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn success(name: TestName) -> Self {
        Self::with_status(name, TestStatus::Success)
    }

    pub fn ignored(name: TestName, reason: impl Into<String>) -> Self {
        let mut result = Self::with_status(name, TestStatus::Ignored);
        result.messages.push(reason.into());
        result
    }

    pub fn canceled(name: TestName) -> Self {
        Self::with_status(name, TestStatus::Canceled)
    }

    /// Result carrying a captured fault
    pub fn error(name: TestName, error: &anyhow::Error) -> Self {
        let mut result = Self::new(name);
        result.add_error(TestError::from_error(error));
        result
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TestStatus) {
        self.status = status;
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_canceled(&self) -> bool {
        self.status == TestStatus::Canceled
    }

    pub fn children(&self) -> &[TestResult] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn errors(&self) -> &[TestError] {
        &self.errors
    }

    pub fn add_child(&mut self, child: TestResult) {
        self.status = self.status.merge(child.status);
        self.children.push(child);
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn add_error(&mut self, error: TestError) {
        self.errors.push(error);
        self.status = TestStatus::Error;
    }

    /// Reset the node so a subtree can be run again
    pub fn clear(&mut self) {
        self.children.clear();
        self.messages.clear();
        self.errors.clear();
        self.status = TestStatus::None;
        self.duration_ms = 0;
    }

    /// Detach the children, leaving this node empty
    pub fn take_children(&mut self) -> Vec<TestResult> {
        std::mem::take(&mut self.children)
    }

    /// Visit every node depth-first, parents before children
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TestResult, usize)) {
        self.walk_at(0, visit);
    }

    fn walk_at<'a>(&'a self, depth: usize, visit: &mut impl FnMut(&'a TestResult, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visit);
        }
    }

    /// Count leaf nodes with the given status
    pub fn count_leaves(&self, status: TestStatus) -> usize {
        let mut count = 0;
        self.walk(&mut |node, _| {
            if !node.has_children() && node.status == status {
                count += 1;
            }
        });
        count
    }

    /// Leaf counts per status
    pub fn count_by_status(&self) -> HashMap<TestStatus, usize> {
        let mut counts = HashMap::new();
        self.walk(&mut |node, _| {
            if !node.has_children() {
                *counts.entry(node.status).or_insert(0) += 1;
            }
        });
        counts
    }

    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |node, _| {
            if !node.has_children() {
                count += 1;
            }
        });
        count
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.name,
            self.duration_ms
        )?;
        if let Some(error) = self.errors.first() {
            write!(f, " - {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> TestName {
        TestName::new(s)
    }

    #[test]
    fn test_status_merge() {
        assert_eq!(TestStatus::None.merge(TestStatus::Success), TestStatus::Success);
        assert_eq!(TestStatus::Success.merge(TestStatus::Ignored), TestStatus::Success);
        assert_eq!(TestStatus::Success.merge(TestStatus::Error), TestStatus::Error);
        assert_eq!(TestStatus::Error.merge(TestStatus::Success), TestStatus::Error);
        assert_eq!(TestStatus::Ignored.merge(TestStatus::Canceled), TestStatus::Canceled);
        assert_eq!(TestStatus::Canceled.merge(TestStatus::Error), TestStatus::Canceled);
        assert_eq!(TestStatus::Success.merge(TestStatus::None), TestStatus::Success);
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut parent = TestResult::new(name("Suite"));
        parent.add_child(TestResult::success(name("A")));
        parent.add_child(TestResult::with_status(name("B"), TestStatus::Error));
        parent.add_child(TestResult::success(name("C")));

        let names: Vec<_> = parent
            .children()
            .iter()
            .map(|c| c.name.to_string())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(parent.status(), TestStatus::Error);
    }

    #[test]
    fn test_error_captures_chain() {
        let error = anyhow::anyhow!("socket closed").context("handshake failed");
        let result = TestResult::error(name("Handshake"), &error);

        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(result.errors()[0].message, "handshake failed");
        assert_eq!(result.errors()[0].causes, vec!["socket closed".to_string()]);
    }

    #[test]
    fn test_clear() {
        let mut result = TestResult::new(name("Suite"));
        result.add_child(TestResult::success(name("A")));
        result.add_message("hello");
        result.clear();

        assert!(!result.has_children());
        assert!(result.messages().is_empty());
        assert_eq!(result.status(), TestStatus::None);
    }

    #[test]
    fn test_leaf_counts() {
        let mut inner = TestResult::new(name("Inner"));
        inner.add_child(TestResult::success(name("A")));
        inner.add_child(TestResult::ignored(name("B"), "not supported"));

        let mut root = TestResult::new(name("Root"));
        root.add_child(inner);
        root.add_child(TestResult::success(name("C")));

        assert_eq!(root.leaf_count(), 3);
        assert_eq!(root.count_leaves(TestStatus::Success), 2);
        assert_eq!(root.count_leaves(TestStatus::Ignored), 1);

        let counts = root.count_by_status();
        assert_eq!(counts.get(&TestStatus::Success), Some(&2));
        assert_eq!(counts.get(&TestStatus::Error), None);
    }
}
