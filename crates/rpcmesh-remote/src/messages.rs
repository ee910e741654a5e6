//! Messages accepted by the supervised children.

use std::fmt;

use rpcmesh_core::{RoutingHandle, RpcError, RpcId, RpcInput, RpcResult};
use tokio::sync::oneshot;

use crate::provider::RouteChange;

/// A route of an RPC inside the cluster.
///
/// Global RPCs have no context or path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteIdentifier {
    /// Routing context, `None` for global RPCs.
    pub context: Option<String>,
    /// The RPC.
    pub rpc: RpcId,
    /// Instance path, `None` for global RPCs.
    pub path: Option<String>,
}

impl RouteIdentifier {
    /// Route of a global RPC.
    pub fn global(rpc: RpcId) -> Self {
        Self {
            context: None,
            rpc,
            path: None,
        }
    }

    /// Whether this is a global route.
    pub fn is_global(&self) -> bool {
        self.context.is_none() && self.path.is_none()
    }
}

impl fmt::Display for RouteIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.context, &self.path) {
            (None, None) => write!(f, "{}", self.rpc),
            (ctx, path) => write!(
                f,
                "{}[{}]{}",
                self.rpc,
                ctx.as_deref().unwrap_or(""),
                path.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Mailbox protocol of the Registry child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryMessage {
    /// Routes now reachable through `handle`.
    Announce {
        /// Announced routes.
        routes: Vec<RouteIdentifier>,
        /// Broker that serves them.
        handle: RoutingHandle,
    },
    /// Routes no longer reachable through `handle`.
    Withdraw {
        /// Withdrawn routes.
        routes: Vec<RouteIdentifier>,
        /// Broker that served them.
        handle: RoutingHandle,
    },
    /// Routed-RPC route change forwarded from the provider.
    RouteChanged {
        /// The change as reported.
        change: RouteChange,
        /// Local broker handle.
        handle: RoutingHandle,
    },
}

impl RegistryMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Announce { .. } => "announce",
            Self::Withdraw { .. } => "withdraw",
            Self::RouteChanged { .. } => "route_changed",
        }
    }
}

/// Mailbox protocol of the Broker child.
#[derive(Debug)]
pub enum BrokerMessage {
    /// Execute `rpc` and answer on `reply`.
    ///
    /// Dropping `reply` without sending surfaces to the caller as
    /// [`RpcError::Abandoned`].
    Dispatch {
        /// RPC to execute.
        rpc: RpcId,
        /// Its input.
        input: RpcInput,
        /// Where the result goes.
        reply: oneshot::Sender<Result<RpcResult, RpcError>>,
    },
}
