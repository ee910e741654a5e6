//! Invocation error types.

use crate::ids::RpcId;

/// Errors that resolve an [`RpcFuture`](crate::rpc::RpcFuture) instead of an
/// [`RpcResult`](crate::rpc::RpcResult).
///
/// Application-level failures travel inside `RpcResult`; this type covers
/// the cases where the dispatch path itself could not produce a result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The broker is not accepting dispatches (stopped or escalated).
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The broker accepted the dispatch but dropped it without replying,
    /// typically because processing faulted.
    #[error("Dispatch of {rpc} abandoned: {message}")]
    Abandoned {
        /// RPC whose reply never arrived.
        rpc: RpcId,
        /// Error description.
        message: String,
    },

    /// No implementation is reachable for the RPC.
    #[error("No implementation for {0}")]
    NoImplementation(RpcId),
}

impl RpcError {
    /// Error category string for logging.
    pub fn category(&self) -> &str {
        match self {
            Self::BrokerUnavailable(_) => "broker_unavailable",
            Self::Abandoned { .. } => "abandoned",
            Self::NoImplementation(_) => "no_implementation",
        }
    }
}
