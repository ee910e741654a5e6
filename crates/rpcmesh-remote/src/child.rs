//! Supervised child tasks.
//!
//! Each child is a tokio task draining its own bounded mailbox. Messages are
//! handled one at a time; a handler error or panic is reported to the
//! supervisor and the child waits for the directive before touching the next
//! message. State held by the behavior survives a resume.

use std::fmt;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use rpcmesh_core::{ClusterAddress, RoutingHandle, SchemaReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ChildFault;
use crate::messages::{BrokerMessage, RegistryMessage};
use crate::policy::Directive;

/// The two children of the RPC supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildKind {
    /// Cluster-wide routing table.
    Registry,
    /// RPC dispatcher.
    Broker,
}

impl ChildKind {
    /// Name the child runs under.
    pub fn name(self) -> &'static str {
        match self {
            Self::Registry => "rpc-registry",
            Self::Broker => "rpc-broker",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only environment handed to every message handler.
#[derive(Clone, Debug)]
pub struct ChildContext {
    kind: ChildKind,
    cluster: ClusterAddress,
    routing_handle: RoutingHandle,
    schema: SchemaReader,
}

impl ChildContext {
    /// Build a context; the supervisor does this for its own children.
    pub fn new(
        kind: ChildKind,
        cluster: ClusterAddress,
        routing_handle: RoutingHandle,
        schema: SchemaReader,
    ) -> Self {
        Self {
            kind,
            cluster,
            routing_handle,
            schema,
        }
    }

    /// Which child this is.
    pub fn kind(&self) -> ChildKind {
        self.kind
    }

    /// Address of the local node.
    pub fn cluster(&self) -> &ClusterAddress {
        &self.cluster
    }

    /// Routing handle of the local broker.
    pub fn routing_handle(&self) -> &RoutingHandle {
        &self.routing_handle
    }

    /// Live view of the schema context; load per message.
    pub fn schema(&self) -> &SchemaReader {
        &self.schema
    }
}

/// Message handler of a supervised child.
#[async_trait]
pub trait ChildBehavior: Send + 'static {
    /// Mailbox message type.
    type Message: Send + 'static;

    /// Handle one message. An `Err` (or a panic) is a fault.
    async fn handle(
        &mut self,
        message: Self::Message,
        ctx: &ChildContext,
    ) -> Result<(), ChildFault>;
}

/// Body of the Registry child: maintains the cluster routing table.
pub trait RegistryBehavior: ChildBehavior<Message = RegistryMessage> {}

impl<T: ChildBehavior<Message = RegistryMessage>> RegistryBehavior for T {}

/// Body of the Broker child: executes dispatched RPCs.
pub trait BrokerBehavior: ChildBehavior<Message = BrokerMessage> {}

impl<T: ChildBehavior<Message = BrokerMessage>> BrokerBehavior for T {}

/// Sending side of a child's mailbox.
pub struct ChildRef<M> {
    kind: ChildKind,
    tx: mpsc::Sender<M>,
}

impl<M> Clone for ChildRef<M> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            tx: self.tx.clone(),
        }
    }
}

impl<M> fmt::Debug for ChildRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildRef")
            .field("kind", &self.kind)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<M: Send + 'static> ChildRef<M> {
    pub(crate) fn new(kind: ChildKind, tx: mpsc::Sender<M>) -> Self {
        Self { kind, tx }
    }

    /// Which child receives the messages.
    pub fn kind(&self) -> ChildKind {
        self.kind
    }

    /// Fire-and-forget send. Never blocks; a full or closed mailbox drops
    /// the message with a warning.
    pub fn tell(&self, message: M) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(child = %self.kind, "child mailbox full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(child = %self.kind, "child stopped, message dropped");
                false
            }
        }
    }

    /// Non-blocking send that hands the message back on failure.
    pub fn try_send(&self, message: M) -> Result<(), mpsc::error::TrySendError<M>> {
        self.tx.try_send(message)
    }

    /// Send, waiting for mailbox capacity.
    pub async fn send(&self, message: M) -> Result<(), mpsc::error::SendError<M>> {
        self.tx.send(message).await
    }

    /// Whether the child has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A fault on its way to the supervisor.
#[derive(Debug)]
pub(crate) struct FaultReport {
    pub(crate) child: ChildKind,
    pub(crate) fault: ChildFault,
    pub(crate) reply: oneshot::Sender<Directive>,
}

/// Spawn `behavior` as a supervised child on `runtime`.
pub(crate) fn spawn_child<B: ChildBehavior>(
    runtime: &tokio::runtime::Handle,
    mut behavior: B,
    ctx: ChildContext,
    capacity: usize,
    faults: mpsc::Sender<FaultReport>,
    cancel: CancellationToken,
) -> (ChildRef<B::Message>, JoinHandle<()>) {
    let kind = ctx.kind();
    let (tx, mut rx) = mpsc::channel::<B::Message>(capacity.max(1));

    let task = runtime.spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            let fault = match AssertUnwindSafe(behavior.handle(message, &ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => continue,
                Ok(Err(fault)) => fault,
                Err(payload) => ChildFault::from_panic(payload.as_ref()),
            };

            let (reply, directive) = oneshot::channel();
            let report = FaultReport {
                child: kind,
                fault,
                reply,
            };
            if faults.send(report).await.is_err() {
                break;
            }
            // Suspended until the supervisor answers.
            let directive = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                d = directive => d,
            };
            match directive {
                Ok(Directive::Resume) => {}
                Ok(Directive::Escalate) | Err(_) => break,
            }
        }
        rx.close();
        debug!(child = %kind, "child stopped");
    });

    (ChildRef::new(kind, tx), task)
}
