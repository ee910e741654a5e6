//! # rpcmesh-core
//!
//! Foundation types shared by every rpcmesh crate:
//!
//! - **Branded IDs**: `SessionId`, `ConsumerId`, `RpcId`, `CapabilityType`,
//!   `ClusterAddress`, `RoutingHandle` as newtypes for type safety
//! - **RPC vocabulary**: opaque [`rpc::RpcInput`] payloads, [`rpc::RpcResult`],
//!   the [`rpc::RpcInvoker`] seam and its [`rpc::RpcFuture`]
//! - **Schema snapshots**: immutable [`schema::SchemaSnapshot`] values behind a
//!   single-writer, multi-reader holder
//! - **Errors**: [`errors::RpcError`] for invocation failures
//! - **Logging**: `tracing` subscriber setup and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod rpc;
pub mod schema;

pub use errors::RpcError;
pub use ids::{CapabilityType, ClusterAddress, ConsumerId, RoutingHandle, RpcId, SessionId};
pub use rpc::{RpcErrorInfo, RpcFuture, RpcInput, RpcInvoker, RpcResult};
pub use schema::{SchemaReader, SchemaSnapshot, SchemaWriter, schema_holder};
