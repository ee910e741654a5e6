//! # rpcmesh-remote
//!
//! Cluster-facing half of rpcmesh: the RPC supervision tree.
//!
//! - **Supervisor**: [`RpcSupervisor`] owns the Registry and Broker children
//!   and the schema holder, and decides per child whether a fault is resumed
//!   or escalated
//! - **Children**: tokio tasks draining their own mailbox one message at a
//!   time; their bodies are supplied through [`RegistryBehavior`] and
//!   [`BrokerBehavior`]
//! - **Fault policy**: [`RestartPolicy`] bounds faults per child per window;
//!   [`FaultPolicy`] picks the directive for faults within budget
//! - **Listeners**: [`RpcListener`] and [`RoutedRpcListener`] translate
//!   provider events into registry messages
//! - **Delegate**: [`RemoteRpcImplementation`] forwards routed RPCs into the broker

#![deny(unsafe_code)]

pub mod child;
pub mod delegate;
pub mod errors;
pub mod listener;
pub mod messages;
pub mod policy;
pub mod provider;
pub mod supervisor;

pub use child::{BrokerBehavior, ChildBehavior, ChildContext, ChildKind, ChildRef, RegistryBehavior};
pub use delegate::RemoteRpcImplementation;
pub use errors::{ChildFault, SupervisionError};
pub use listener::{RoutedRpcListener, RpcListener};
pub use messages::{BrokerMessage, RegistryMessage, RouteIdentifier};
pub use policy::{Directive, FaultPolicy, FaultWindow, RestartPolicy, ResumeAll};
pub use provider::{
    ProviderSession, RouteChange, RouteChangeListener, RoutingContext, RpcRegistrationListener,
};
pub use supervisor::{RpcSupervisor, SupervisorConfig, SupervisorState};
