//! RPC invocation vocabulary.
//!
//! Payloads are opaque to this layer: an [`RpcInput`] is forwarded as-is and
//! an [`RpcResult`] is handed back as-is. Nothing here inspects either.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;
use crate::ids::RpcId;

/// Opaque RPC input payload.
pub type RpcInput = Value;

/// Future resolving to the outcome of one RPC invocation.
pub type RpcFuture = BoxFuture<'static, Result<RpcResult, RpcError>>;

/// Application-level error reported inside an [`RpcResult`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcErrorInfo {
    /// Machine-readable tag (e.g. `"operation-failed"`).
    pub tag: String,
    /// Human-readable message.
    pub message: String,
}

/// Result of an RPC as produced by its implementation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResult {
    /// Whether the implementation reported success.
    pub successful: bool,
    /// Output payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Errors reported by the implementation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RpcErrorInfo>,
}

impl RpcResult {
    /// A successful result carrying `output`.
    #[must_use]
    pub fn success(output: Option<Value>) -> Self {
        Self {
            successful: true,
            output,
            errors: Vec::new(),
        }
    }

    /// A failed result carrying `errors`.
    #[must_use]
    pub fn failed(errors: Vec<RpcErrorInfo>) -> Self {
        Self {
            successful: false,
            output: None,
            errors,
        }
    }
}

/// Asynchronous RPC entry point.
///
/// Implemented by whatever performs dispatch (the supervised broker, a
/// routed-RPC delegate, test doubles). Must return without blocking; the
/// work completes when the returned future resolves.
pub trait RpcInvoker: Send + Sync {
    /// Invoke `rpc` with `input`.
    fn invoke_rpc(&self, rpc: &RpcId, input: RpcInput) -> RpcFuture;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use serde_json::json;

    struct Echo;

    /// Implements nothing.
    struct Empty;

    impl RpcInvoker for Empty {
        fn invoke_rpc(&self, rpc: &RpcId, _input: RpcInput) -> RpcFuture {
            futures::future::ready(Err(RpcError::NoImplementation(rpc.clone()))).boxed()
        }
    }

    impl RpcInvoker for Echo {
        fn invoke_rpc(&self, _rpc: &RpcId, input: RpcInput) -> RpcFuture {
            async move { Ok(RpcResult::success(Some(input))) }.boxed()
        }
    }

    #[tokio::test]
    async fn invoker_passes_payload_through() {
        let result = Echo
            .invoke_rpc(&RpcId::from("echo"), json!({"n": 1}))
            .await
            .unwrap();
        assert!(result.successful);
        assert_eq!(result.output, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn invoker_errors_resolve_the_future() {
        let invoker: &dyn RpcInvoker = &Empty;
        assert_matches!(
            invoker.invoke_rpc(&RpcId::from("orders:cancel"), json!(null)).await,
            Err(RpcError::NoImplementation(rpc)) if rpc.as_str() == "orders:cancel"
        );
    }

    #[test]
    fn result_json_omits_empty_fields() {
        let json = serde_json::to_value(RpcResult::success(None)).unwrap();
        assert_eq!(json, json!({"successful": true}));

        let failed = RpcResult::failed(vec![RpcErrorInfo {
            tag: "operation-failed".into(),
            message: "boom".into(),
        }]);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["errors"][0]["tag"], "operation-failed");
        assert_eq!(json["successful"], false);
    }
}
