//! Provider session seam.
//!
//! The provider session is the local registry of RPC implementations. The
//! supervisor subscribes to it at startup and never owns it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rpcmesh_core::{RpcId, RpcInvoker};

/// Local registry of RPC implementations.
pub trait ProviderSession: Send + Sync {
    /// Subscribe to implementation added/removed events.
    fn add_rpc_registration_listener(&self, listener: Arc<dyn RpcRegistrationListener>);

    /// Subscribe to routed-RPC route changes.
    fn register_route_change_listener(&self, listener: Arc<dyn RouteChangeListener>);

    /// Handler for routed RPCs with no local route.
    fn set_routed_rpc_default_delegate(&self, delegate: Arc<dyn RpcInvoker>);

    /// RPCs with a local implementation right now.
    fn supported_rpcs(&self) -> BTreeSet<RpcId>;
}

/// Receives global RPC implementation events.
///
/// Called from arbitrary provider threads. Implementations must not block.
pub trait RpcRegistrationListener: Send + Sync {
    /// An implementation of `rpc` became available locally.
    fn on_rpc_implementation_added(&self, rpc: &RpcId);

    /// The local implementation of `rpc` went away.
    fn on_rpc_implementation_removed(&self, rpc: &RpcId);
}

/// Receives routed-RPC route changes.
pub trait RouteChangeListener: Send + Sync {
    /// Routes were announced and/or removed.
    fn on_route_change(&self, change: RouteChange);
}

/// Context part of a routed RPC route.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoutingContext {
    /// Context the route is scoped to.
    pub context: String,
    /// Routed RPC.
    pub rpc: RpcId,
}

impl RoutingContext {
    /// Build a routing context.
    pub fn new(context: impl Into<String>, rpc: impl Into<RpcId>) -> Self {
        Self {
            context: context.into(),
            rpc: rpc.into(),
        }
    }
}

/// Batch of route announcements and removals, keyed by routing context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteChange {
    /// Newly reachable paths per context.
    pub announcements: BTreeMap<RoutingContext, BTreeSet<String>>,
    /// Paths no longer reachable per context.
    pub removals: BTreeMap<RoutingContext, BTreeSet<String>>,
}

impl RouteChange {
    /// Add an announced path.
    #[must_use]
    pub fn announce(mut self, context: RoutingContext, path: impl Into<String>) -> Self {
        let _ = self
            .announcements
            .entry(context)
            .or_default()
            .insert(path.into());
        self
    }

    /// Add a removed path.
    #[must_use]
    pub fn remove(mut self, context: RoutingContext, path: impl Into<String>) -> Self {
        let _ = self.removals.entry(context).or_default().insert(path.into());
        self
    }

    /// Whether the change carries nothing.
    pub fn is_empty(&self) -> bool {
        self.announcements.values().all(BTreeSet::is_empty)
            && self.removals.values().all(BTreeSet::is_empty)
    }
}
