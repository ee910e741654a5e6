//! Provider listeners feeding the Registry child.
//!
//! Both listeners run on whatever thread the provider fires from; provider
//! callbacks only ever do a non-blocking send into the registry mailbox. The
//! startup batch is the exception and waits for mailbox capacity.

use std::collections::BTreeSet;

use rpcmesh_core::{RoutingHandle, RpcId};
use tracing::{debug, trace, warn};

use crate::child::ChildRef;
use crate::messages::{RegistryMessage, RouteIdentifier};
use crate::provider::{RouteChange, RouteChangeListener, RpcRegistrationListener};

/// Announces and withdraws global RPC implementations.
#[derive(Debug)]
pub struct RpcListener {
    registry: ChildRef<RegistryMessage>,
    handle: RoutingHandle,
}

impl RpcListener {
    /// Listener announcing routes served at `handle`.
    pub fn new(registry: ChildRef<RegistryMessage>, handle: RoutingHandle) -> Self {
        Self { registry, handle }
    }

    /// Announce every RPC in `rpcs`, one message each, waiting whenever the
    /// registry mailbox is full. Returns how many were queued; fewer than
    /// `rpcs.len()` only if the registry stopped.
    pub async fn announce_all(&self, rpcs: &BTreeSet<RpcId>) -> usize {
        let mut announced = 0;
        for rpc in rpcs {
            trace!(rpc = %rpc, "announcing rpc implementation");
            if self.registry.send(self.announcement(rpc)).await.is_err() {
                warn!(rpc = %rpc, "registry stopped during startup announcements");
                break;
            }
            announced += 1;
        }
        announced
    }

    fn announcement(&self, rpc: &RpcId) -> RegistryMessage {
        RegistryMessage::Announce {
            routes: vec![RouteIdentifier::global(rpc.clone())],
            handle: self.handle.clone(),
        }
    }
}

impl RpcRegistrationListener for RpcListener {
    fn on_rpc_implementation_added(&self, rpc: &RpcId) {
        trace!(rpc = %rpc, "announcing rpc implementation");
        let _ = self.registry.tell(self.announcement(rpc));
    }

    fn on_rpc_implementation_removed(&self, rpc: &RpcId) {
        trace!(rpc = %rpc, "withdrawing rpc implementation");
        let _ = self.registry.tell(RegistryMessage::Withdraw {
            routes: vec![RouteIdentifier::global(rpc.clone())],
            handle: self.handle.clone(),
        });
    }
}

/// Forwards routed-RPC route changes.
#[derive(Debug)]
pub struct RoutedRpcListener {
    registry: ChildRef<RegistryMessage>,
    handle: RoutingHandle,
}

impl RoutedRpcListener {
    /// Listener forwarding changes for the broker at `handle`.
    pub fn new(registry: ChildRef<RegistryMessage>, handle: RoutingHandle) -> Self {
        Self { registry, handle }
    }
}

impl RouteChangeListener for RoutedRpcListener {
    fn on_route_change(&self, change: RouteChange) {
        if change.is_empty() {
            debug!("ignoring empty route change");
            return;
        }
        let _ = self.registry.tell(RegistryMessage::RouteChanged {
            change,
            handle: self.handle.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::ChildKind;
    use crate::provider::RoutingContext;
    use assert_matches::assert_matches;
    use rpcmesh_core::logging::capture_logs;
    use tokio::sync::mpsc;
    use tracing::Level;

    fn registry(capacity: usize) -> (ChildRef<RegistryMessage>, mpsc::Receiver<RegistryMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChildRef::new(ChildKind::Registry, tx), rx)
    }

    fn handle() -> RoutingHandle {
        RoutingHandle::from("rpcmesh://n@h:1/user/rpc/rpc-broker")
    }

    #[test]
    fn added_and_removed_become_announce_and_withdraw() {
        let (reg, mut rx) = registry(4);
        let listener = RpcListener::new(reg, handle());
        let rpc = RpcId::from("inventory:get-item");

        listener.on_rpc_implementation_added(&rpc);
        listener.on_rpc_implementation_removed(&rpc);

        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryMessage::Announce {
                routes: vec![RouteIdentifier::global(rpc.clone())],
                handle: handle(),
            }
        );
        assert_matches!(
            rx.try_recv().unwrap(),
            RegistryMessage::Withdraw { routes, .. } if routes == vec![RouteIdentifier::global(rpc.clone())]
        );
    }

    #[tokio::test]
    async fn announce_all_sends_one_message_per_rpc() {
        let (reg, mut rx) = registry(8);
        let listener = RpcListener::new(reg, handle());
        let rpcs: BTreeSet<RpcId> = ["a:x", "b:y", "c:z"].into_iter().map(RpcId::from).collect();

        assert_eq!(listener.announce_all(&rpcs).await, 3);

        let mut announced = BTreeSet::new();
        while let Ok(msg) = rx.try_recv() {
            let RegistryMessage::Announce { routes, .. } = msg else {
                panic!("unexpected message");
            };
            assert_eq!(routes.len(), 1);
            assert!(announced.insert(routes[0].rpc.clone()));
        }
        assert_eq!(announced, rpcs);
    }

    #[tokio::test]
    async fn announce_all_waits_for_a_full_mailbox() {
        let (logs, _guard) = capture_logs();
        let (reg, mut rx) = registry(1);
        let listener = RpcListener::new(reg, handle());
        let rpcs: BTreeSet<RpcId> = (0..6).map(|i| RpcId::from(format!("r:{i}"))).collect();

        let drain = tokio::spawn(async move {
            let mut received = BTreeSet::new();
            while let Some(RegistryMessage::Announce { routes, .. }) = rx.recv().await {
                let _ = received.insert(routes[0].rpc.clone());
            }
            received
        });
        assert_eq!(listener.announce_all(&rpcs).await, 6);
        drop(listener);

        assert_eq!(drain.await.unwrap(), rpcs);
        assert!(!logs.has_event(Level::WARN, "mailbox full"));
    }

    #[tokio::test]
    async fn announce_all_stops_when_registry_is_gone() {
        let (reg, rx) = registry(4);
        drop(rx);
        let listener = RpcListener::new(reg, handle());
        let rpcs: BTreeSet<RpcId> = ["a:x", "b:y"].into_iter().map(RpcId::from).collect();
        assert_eq!(listener.announce_all(&rpcs).await, 0);
    }

    #[test]
    fn full_mailbox_never_panics() {
        let (logs, _guard) = capture_logs();
        let (reg, _rx) = registry(1);
        let listener = RpcListener::new(reg, handle());
        for i in 0..5 {
            listener.on_rpc_implementation_added(&RpcId::from(format!("r:{i}")));
        }
        assert_eq!(logs.matching(Level::WARN, "mailbox full").len(), 4);
    }

    #[test]
    fn stopped_registry_is_logged_not_raised() {
        let (logs, _guard) = capture_logs();
        let (reg, rx) = registry(1);
        drop(rx);
        let listener = RpcListener::new(reg, handle());
        listener.on_rpc_implementation_removed(&RpcId::from("r:1"));
        assert!(logs.has_event(Level::WARN, "child stopped"));
    }

    #[test]
    fn route_changes_are_forwarded_unless_empty() {
        let (reg, mut rx) = registry(4);
        let listener = RoutedRpcListener::new(reg, handle());

        listener.on_route_change(RouteChange::default());
        assert!(rx.try_recv().is_err());

        let change =
            RouteChange::default().announce(RoutingContext::new("tenant", "a:b"), "/items/1");
        listener.on_route_change(change.clone());
        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryMessage::RouteChanged {
                change,
                handle: handle(),
            }
        );
    }
}
