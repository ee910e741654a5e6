//! Cluster identity and local provider settings.

use rpcmesh_core::{ClusterAddress, RoutingHandle, RpcId};
use serde::{Deserialize, Serialize};

/// Cluster identity of this node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSettings {
    /// Address of this node inside the cluster.
    pub address: String,
    /// Path suffix appended to the address to form the broker routing handle.
    pub broker_path: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            address: "rpcmesh://local@127.0.0.1:2550".to_string(),
            broker_path: "/user/rpc/rpc-broker".to_string(),
        }
    }
}

impl ClusterSettings {
    /// Typed cluster address.
    pub fn cluster_address(&self) -> ClusterAddress {
        ClusterAddress::from(self.address.as_str())
    }

    /// Routing handle of the local broker.
    pub fn routing_handle(&self) -> RoutingHandle {
        RoutingHandle::for_broker(&self.cluster_address(), &self.broker_path)
    }
}

/// RPCs and services offered by the local provider.
///
/// Only used by the in-memory provider of the node binary; real deployments
/// plug in their own provider session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// RPC identifiers implemented on this node.
    pub supported_rpcs: Vec<String>,
    /// Capability types this node can hand out to consumers.
    pub services: Vec<String>,
}

impl ProviderSettings {
    /// Supported RPCs as typed identifiers.
    pub fn rpc_ids(&self) -> Vec<RpcId> {
        self.supported_rpcs
            .iter()
            .map(|s| RpcId::from(s.as_str()))
            .collect()
    }
}
