//! # rpcmesh-node
//!
//! In-process implementations of the provider, registry, broker and service
//! seams. The `rpcmesh-node` binary wires them to the supervisor and the
//! local broker.

#![deny(unsafe_code)]

pub mod providers;

pub use providers::{
    InMemoryProvider, LocalDispatch, PassthroughProxy, PassthroughProxyFactory, RouteView,
    RoutingTable, StaticServiceLocator,
};
