//! Data models for test execution
//!
//! Result tree, test names and flags shared by the engine and its frontends.

mod flags;
mod name;
mod test_result;

pub use flags::TestFlags;
pub use name::{NameSegment, TestName};
pub use test_result::{TestError, TestResult, TestStatus};
