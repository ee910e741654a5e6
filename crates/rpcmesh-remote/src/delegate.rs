//! Routed-RPC default delegate.

use futures::FutureExt;
use rpcmesh_core::{RpcError, RpcFuture, RpcId, RpcInput, RpcInvoker};
use tokio::sync::{mpsc, oneshot};

use crate::child::ChildRef;
use crate::messages::BrokerMessage;

/// Forwards RPCs the provider cannot serve locally into the Broker child.
///
/// The message is queued before `invoke_rpc` returns when the mailbox has
/// room; otherwise the returned future waits for capacity.
#[derive(Clone, Debug)]
pub struct RemoteRpcImplementation {
    broker: ChildRef<BrokerMessage>,
}

impl RemoteRpcImplementation {
    /// Delegate dispatching through `broker`.
    pub fn new(broker: ChildRef<BrokerMessage>) -> Self {
        Self { broker }
    }
}

fn broker_gone() -> RpcError {
    RpcError::BrokerUnavailable("rpc-broker has stopped".into())
}

impl RpcInvoker for RemoteRpcImplementation {
    fn invoke_rpc(&self, rpc: &RpcId, input: RpcInput) -> RpcFuture {
        let (reply, response) = oneshot::channel();
        let message = BrokerMessage::Dispatch {
            rpc: rpc.clone(),
            input,
            reply,
        };

        let pending = match self.broker.try_send(message) {
            Ok(()) => None,
            Err(mpsc::error::TrySendError::Full(message)) => Some(message),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return futures::future::ready(Err(broker_gone())).boxed();
            }
        };

        let broker = self.broker.clone();
        let rpc = rpc.clone();
        async move {
            if let Some(message) = pending {
                broker.send(message).await.map_err(|_| broker_gone())?;
            }
            match response.await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Abandoned {
                    rpc,
                    message: "broker dropped the request without replying".into(),
                }),
            }
        }
        .boxed()
    }
}
