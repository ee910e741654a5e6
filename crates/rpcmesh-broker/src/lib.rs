//! # rpcmesh-broker
//!
//! Consumer-facing half of rpcmesh.
//!
//! - **Sessions**: [`SessionManager`] is one consumer's attachment to the
//!   broker. It caches capability proxies, forwards RPCs, and tears itself
//!   down exactly once.
//! - **Service seams**: [`ServiceLocator`], [`ProxyFactory`] and
//!   [`ServiceProxy`] abstract whatever hosts the concrete services.
//! - **Broker**: [`LocalBroker`] hands out sessions, routes their RPCs into
//!   an [`RpcInvoker`](rpcmesh_core::RpcInvoker), and forgets sessions once
//!   they close.

#![deny(unsafe_code)]

pub mod broker;
pub mod errors;
pub mod service;
pub mod session_manager;

pub use broker::{BrokerHandle, LocalBroker};
pub use errors::{BrokerError, SessionError};
pub use service::{
    CloseableProxy, ProxyError, ProxyFactory, ServiceImpl, ServiceLocator, ServiceProxy,
    ServiceReference,
};
pub use session_manager::SessionManager;
