//! Invoker and host flags

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Behavior flags declared by invokers and hosts
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TestFlags: u32 {
        /// Keep running siblings after a child fails
        const CONTINUE_ON_ERROR = 1 << 0;
        /// Report under an own result node
        const BROWSABLE = 1 << 1;
        /// Append per-value results directly instead of grouping by value
        const FLATTEN_HIERARCHY = 1 << 2;
        /// Exclude from suite listings
        const HIDDEN = 1 << 3;
    }
}

impl TestFlags {
    pub fn continue_on_error(self) -> bool {
        self.contains(TestFlags::CONTINUE_ON_ERROR)
    }

    pub fn is_browsable(self) -> bool {
        self.contains(TestFlags::BROWSABLE) && !self.contains(TestFlags::FLATTEN_HIERARCHY)
    }

    pub fn is_hidden(self) -> bool {
        self.contains(TestFlags::HIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browsable_requires_no_flatten() {
        assert!(TestFlags::BROWSABLE.is_browsable());
        assert!(!(TestFlags::BROWSABLE | TestFlags::FLATTEN_HIERARCHY).is_browsable());
        assert!(!TestFlags::empty().is_browsable());
    }
}
