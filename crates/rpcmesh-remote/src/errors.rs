//! Supervision error types.

use std::any::Any;

use crate::child::ChildKind;
use crate::supervisor::SupervisorState;

/// A fault raised while a child processed one message.
///
/// Faults never reach RPC callers; they are reported to the supervisor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChildFault {
    /// The child's handler returned an error.
    #[error("{0}")]
    Failed(String),

    /// The child's handler panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl ChildFault {
    /// Fault from any displayable error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Fault from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(message)
    }

    /// Error category string for logging.
    pub fn category(&self) -> &str {
        match self {
            Self::Failed(_) => "failed",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// Errors surfaced by [`RpcSupervisor`](crate::RpcSupervisor).
#[derive(Debug, thiserror::Error)]
pub enum SupervisionError {
    /// `start` was called outside a tokio runtime.
    #[error("RPC supervisor requires a tokio runtime")]
    NoRuntime,

    /// The fault budget of a child was exhausted; the subsystem is down.
    #[error("RPC subsystem escalated after {faults} faults in {child}")]
    Escalated {
        /// Child whose budget was exhausted.
        child: ChildKind,
        /// Faults counted inside the window.
        faults: usize,
    },

    /// The supervisor is not accepting control messages.
    #[error("RPC supervisor not running (state: {0:?})")]
    NotRunning(SupervisorState),
}

impl SupervisionError {
    /// Whether the node needs an external restart of the RPC subsystem.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Escalated { .. })
    }

    /// Error category string for logging.
    pub fn category(&self) -> &str {
        match self {
            Self::NoRuntime => "no_runtime",
            Self::Escalated { .. } => "escalated",
            Self::NotRunning(_) => "not_running",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(ChildFault::from_panic(s.as_ref()), ChildFault::Panicked("boom".into()));

        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(
            ChildFault::from_panic(owned.as_ref()),
            ChildFault::Panicked("bang".into())
        );

        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(
            ChildFault::from_panic(other.as_ref()),
            ChildFault::Panicked("non-string panic payload".into())
        );
    }

    #[test]
    fn display() {
        assert_eq!(ChildFault::failed("table corrupt").to_string(), "table corrupt");
        let err = SupervisionError::Escalated {
            child: ChildKind::Registry,
            faults: 11,
        };
        assert_eq!(
            err.to_string(),
            "RPC subsystem escalated after 11 faults in rpc-registry"
        );
        assert!(err.is_fatal());
        assert!(!SupervisionError::NoRuntime.is_fatal());
    }
}
