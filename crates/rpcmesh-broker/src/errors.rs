//! Session and broker error types.

use rpcmesh_core::{CapabilityType, SessionId};

/// Errors raised by [`SessionManager`](crate::SessionManager) operations.
///
/// A missing capability is not an error (`Ok(None)`), and neither is a
/// second `close()`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A session operation ran before a broker was bound.
    #[error("Session has no broker bound")]
    BrokerNotBound,

    /// A broker was already bound to this session.
    #[error("Session already has a broker bound")]
    BrokerAlreadyBound,

    /// The session is closed.
    #[error("Session closed: {0}")]
    Closed(SessionId),

    /// The proxy factory failed for a located service.
    #[error("Failed to create proxy for {capability}: {message}")]
    ProxyInstantiation {
        /// Capability being resolved.
        capability: CapabilityType,
        /// Error description.
        message: String,
    },

    /// Closing a proxy failed during session teardown.
    #[error("Failed to close proxy for {capability}: {message}")]
    ProxyClose {
        /// Capability whose proxy failed to close.
        capability: CapabilityType,
        /// Error description.
        message: String,
    },

    /// The cached proxy is not of the requested concrete type.
    #[error("Proxy for {capability} is not a {expected}")]
    ProxyTypeMismatch {
        /// Capability that was resolved.
        capability: CapabilityType,
        /// Requested Rust type name.
        expected: &'static str,
    },
}

impl SessionError {
    /// Whether the error is a precondition violation by the caller.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, Self::BrokerNotBound | Self::BrokerAlreadyBound)
    }

    /// Error category string for logging.
    pub fn category(&self) -> &str {
        match self {
            Self::BrokerNotBound => "broker_not_bound",
            Self::BrokerAlreadyBound => "broker_already_bound",
            Self::Closed(_) => "closed",
            Self::ProxyInstantiation { .. } => "proxy_instantiation",
            Self::ProxyClose { .. } => "proxy_close",
            Self::ProxyTypeMismatch { .. } => "proxy_type_mismatch",
        }
    }
}

/// Errors raised by [`LocalBroker`](crate::LocalBroker).
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker is shut down and accepts no new sessions.
    #[error("Broker is shut down")]
    ShutDown,

    /// Session setup failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}
