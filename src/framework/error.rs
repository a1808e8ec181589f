//! Engine error types

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised by hosts, instances and invokers.
///
/// Only [`EngineError::is_fatal`] errors ever leave an invoker as `Err`;
/// everything else is converted into an error result where it happened.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("host `{host}` already has a live instance")]
    HostInUse { host: String },

    #[error("host `{host}` does not own the current instance")]
    InstanceMismatch { host: String },

    #[error("setup of `{host}` failed")]
    Setup {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("teardown of `{host}` failed")]
    Teardown {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("parameter source `{0}` is not registered")]
    UnknownSource(String),

    #[error("no custom instance factory available for `{0}`")]
    NoFactory(String),

    #[error("operation canceled")]
    Canceled,
}

impl EngineError {
    /// Engine invariant violations; these indicate a bug, not a test outcome
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::HostInUse { .. } | EngineError::InstanceMismatch { .. }
        )
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            EngineError::Canceled => true,
            EngineError::Setup { source, .. } | EngineError::Teardown { source, .. } => {
                matches!(source.downcast_ref::<EngineError>(), Some(EngineError::Canceled))
            }
            _ => false,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// `Err(Canceled)` once `cancel` has been signaled
pub fn check_canceled(cancel: &CancellationToken) -> EngineResult<()> {
    if cancel.is_cancelled() {
        return Err(EngineError::Canceled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::HostInUse { host: "h".into() }.is_fatal());
        assert!(EngineError::InstanceMismatch { host: "h".into() }.is_fatal());
        assert!(!EngineError::Canceled.is_fatal());
        assert!(!EngineError::UnknownSource("x".into()).is_fatal());
    }

    #[test]
    fn test_nested_cancellation() {
        let error = EngineError::Setup {
            host: "fixture".into(),
            source: EngineError::Canceled.into(),
        };
        assert!(error.is_canceled());
        assert_eq!(error.to_string(), "setup of `fixture` failed");
    }
}
