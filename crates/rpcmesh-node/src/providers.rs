//! In-process implementations of the provider, registry, broker and service
//! seams, used when the node runs without a cluster transport.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use rpcmesh_broker::{
    CloseableProxy, ProxyError, ProxyFactory, ServiceLocator, ServiceProxy, ServiceReference,
};
use rpcmesh_core::{CapabilityType, RoutingHandle, RpcError, RpcId, RpcInvoker, RpcResult};
use rpcmesh_remote::{
    BrokerMessage, ChildBehavior, ChildContext, ChildFault, ProviderSession, RegistryMessage,
    RouteChangeListener, RoutingContext, RpcRegistrationListener,
};
use serde_json::json;
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Provider session backed by a set of locally implemented RPCs.
#[derive(Default)]
pub struct InMemoryProvider {
    rpcs: RwLock<BTreeSet<RpcId>>,
    rpc_listeners: RwLock<Vec<Arc<dyn RpcRegistrationListener>>>,
    route_listeners: RwLock<Vec<Arc<dyn RouteChangeListener>>>,
    delegate: RwLock<Option<Arc<dyn RpcInvoker>>>,
}

impl InMemoryProvider {
    /// Provider implementing `rpcs`.
    pub fn new(rpcs: impl IntoIterator<Item = RpcId>) -> Self {
        Self {
            rpcs: RwLock::new(rpcs.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Whether `rpc` is implemented on this node.
    pub fn implements(&self, rpc: &RpcId) -> bool {
        self.rpcs.read().contains(rpc)
    }

    /// Add an implementation and notify listeners.
    pub fn register_rpc(&self, rpc: RpcId) {
        if !self.rpcs.write().insert(rpc.clone()) {
            return;
        }
        let listeners = self.rpc_listeners.read().clone();
        for listener in listeners {
            listener.on_rpc_implementation_added(&rpc);
        }
    }

    /// Remove an implementation and notify listeners.
    pub fn unregister_rpc(&self, rpc: &RpcId) {
        if !self.rpcs.write().remove(rpc) {
            return;
        }
        let listeners = self.rpc_listeners.read().clone();
        for listener in listeners {
            listener.on_rpc_implementation_removed(rpc);
        }
    }

    /// Routed-RPC fallback installed by the supervisor, if any.
    pub fn default_delegate(&self) -> Option<Arc<dyn RpcInvoker>> {
        self.delegate.read().clone()
    }

    /// Number of subscribed route-change listeners.
    pub fn route_listener_count(&self) -> usize {
        self.route_listeners.read().len()
    }
}

impl ProviderSession for InMemoryProvider {
    fn add_rpc_registration_listener(&self, listener: Arc<dyn RpcRegistrationListener>) {
        self.rpc_listeners.write().push(listener);
    }

    fn register_route_change_listener(&self, listener: Arc<dyn RouteChangeListener>) {
        self.route_listeners.write().push(listener);
    }

    fn set_routed_rpc_default_delegate(&self, delegate: Arc<dyn RpcInvoker>) {
        *self.delegate.write() = Some(delegate);
    }

    fn supported_rpcs(&self) -> BTreeSet<RpcId> {
        self.rpcs.read().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Read side of the routing table, shared outside the registry child.
#[derive(Clone, Default)]
pub struct RouteView {
    global: Arc<RwLock<BTreeMap<RpcId, BTreeSet<RoutingHandle>>>>,
    routed: Arc<RwLock<BTreeMap<RoutingContext, BTreeSet<String>>>>,
}

impl RouteView {
    /// Brokers known to serve `rpc`.
    pub fn handles_for(&self, rpc: &RpcId) -> BTreeSet<RoutingHandle> {
        self.global.read().get(rpc).cloned().unwrap_or_default()
    }

    /// Number of global RPCs with at least one route.
    pub fn global_routes(&self) -> usize {
        self.global.read().len()
    }

    /// Paths known for a routed-RPC context.
    pub fn paths_for(&self, context: &RoutingContext) -> BTreeSet<String> {
        self.routed.read().get(context).cloned().unwrap_or_default()
    }
}

/// Registry child body keeping the routing table in memory.
#[derive(Default)]
pub struct RoutingTable {
    view: RouteView,
}

impl RoutingTable {
    /// Shared read side of this table.
    pub fn view(&self) -> RouteView {
        self.view.clone()
    }
}

#[async_trait]
impl ChildBehavior for RoutingTable {
    type Message = RegistryMessage;

    async fn handle(&mut self, message: RegistryMessage, _ctx: &ChildContext) -> Result<(), ChildFault> {
        match message {
            RegistryMessage::Announce { routes, handle } => {
                let mut global = self.view.global.write();
                for route in routes {
                    debug!(route = %route, handle = %handle, "route announced");
                    let _ = global.entry(route.rpc).or_default().insert(handle.clone());
                }
            }
            RegistryMessage::Withdraw { routes, handle } => {
                let mut global = self.view.global.write();
                for route in routes {
                    debug!(route = %route, handle = %handle, "route withdrawn");
                    if let Some(handles) = global.get_mut(&route.rpc) {
                        let _ = handles.remove(&handle);
                        if handles.is_empty() {
                            let _ = global.remove(&route.rpc);
                        }
                    }
                }
            }
            RegistryMessage::RouteChanged { change, .. } => {
                let mut routed = self.view.routed.write();
                for (context, paths) in change.announcements {
                    routed.entry(context).or_default().extend(paths);
                }
                for (context, paths) in change.removals {
                    if let Some(known) = routed.get_mut(&context) {
                        known.retain(|p| !paths.contains(p));
                        if known.is_empty() {
                            let _ = routed.remove(&context);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Broker
// ─────────────────────────────────────────────────────────────────────────────

/// Broker child body answering RPCs implemented by the local provider.
pub struct LocalDispatch {
    provider: Arc<InMemoryProvider>,
}

impl LocalDispatch {
    /// Dispatcher answering from `provider`.
    pub fn new(provider: Arc<InMemoryProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChildBehavior for LocalDispatch {
    type Message = BrokerMessage;

    async fn handle(&mut self, message: BrokerMessage, ctx: &ChildContext) -> Result<(), ChildFault> {
        let BrokerMessage::Dispatch { rpc, input, reply } = message;
        let result = if self.provider.implements(&rpc) {
            let schema = ctx.schema().load();
            Ok(RpcResult::success(Some(json!({
                "rpc": rpc.as_str(),
                "schemaVersion": schema.version(),
                "input": input,
            }))))
        } else {
            Err(RpcError::NoImplementation(rpc))
        };
        let _ = reply.send(result);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// Locator over a fixed set of capability names.
pub struct StaticServiceLocator {
    capabilities: BTreeSet<CapabilityType>,
}

impl StaticServiceLocator {
    /// Locator for the given capability names.
    pub fn new<S: AsRef<str>>(capabilities: &[S]) -> Self {
        Self {
            capabilities: capabilities
                .iter()
                .map(|c| CapabilityType::from(c.as_ref()))
                .collect(),
        }
    }
}

impl ServiceLocator for StaticServiceLocator {
    fn locate(&self, capability: &CapabilityType) -> Option<ServiceReference> {
        self.capabilities.contains(capability).then(|| ServiceReference {
            capability: capability.clone(),
            provider: "rpcmesh-node".to_string(),
            implementation: Arc::new(capability.to_string()),
        })
    }
}

/// Factory wrapping every located service in a [`PassthroughProxy`].
pub struct PassthroughProxyFactory;

impl ProxyFactory for PassthroughProxyFactory {
    fn create_proxy(&self, reference: ServiceReference) -> Result<Arc<dyn ServiceProxy>, ProxyError> {
        Ok(Arc::new(PassthroughProxy {
            capability: reference.capability,
            implementation: reference.implementation,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Proxy handing out the located implementation unchanged.
pub struct PassthroughProxy {
    capability: CapabilityType,
    implementation: Arc<dyn Any + Send + Sync>,
    closed: AtomicBool,
}

impl PassthroughProxy {
    /// The wrapped implementation.
    pub fn implementation(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.implementation
    }

    /// Whether the owning session closed this proxy.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ServiceProxy for PassthroughProxy {
    fn capability(&self) -> &CapabilityType {
        &self.capability
    }

    fn as_closeable(&self) -> Option<&dyn CloseableProxy> {
        Some(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl CloseableProxy for PassthroughProxy {
    fn close(&self) -> Result<(), ProxyError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(capability = %self.capability, "service proxy closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rpcmesh_core::{ClusterAddress, SchemaSnapshot, schema_holder};
    use rpcmesh_remote::{ChildKind, RouteChange, RouteIdentifier};
    use tokio::sync::oneshot;

    struct Recorder(RwLock<Vec<(bool, RpcId)>>);

    impl RpcRegistrationListener for Recorder {
        fn on_rpc_implementation_added(&self, rpc: &RpcId) {
            self.0.write().push((true, rpc.clone()));
        }

        fn on_rpc_implementation_removed(&self, rpc: &RpcId) {
            self.0.write().push((false, rpc.clone()));
        }
    }

    fn ctx(kind: ChildKind, version: u64) -> ChildContext {
        let (_writer, reader) = schema_holder(SchemaSnapshot::new(version));
        ChildContext::new(
            kind,
            ClusterAddress::from("node"),
            RoutingHandle::from("node/broker"),
            reader,
        )
    }

    #[test]
    fn provider_notifies_only_on_change() {
        let provider = InMemoryProvider::new([RpcId::from("a:x")]);
        let recorder = Arc::new(Recorder(RwLock::new(Vec::new())));
        provider.add_rpc_registration_listener(recorder.clone());

        provider.register_rpc(RpcId::from("a:x"));
        provider.register_rpc(RpcId::from("b:y"));
        provider.unregister_rpc(&RpcId::from("a:x"));
        provider.unregister_rpc(&RpcId::from("zz:z"));

        assert_eq!(
            *recorder.0.read(),
            vec![(true, RpcId::from("b:y")), (false, RpcId::from("a:x"))]
        );
        assert_eq!(provider.supported_rpcs(), BTreeSet::from([RpcId::from("b:y")]));
    }

    #[tokio::test]
    async fn routing_table_tracks_announce_and_withdraw() {
        let mut table = RoutingTable::default();
        let view = table.view();
        let ctx = ctx(ChildKind::Registry, 1);
        let rpc = RpcId::from("a:x");
        let a = RoutingHandle::from("node-a/broker");
        let b = RoutingHandle::from("node-b/broker");

        for handle in [&a, &b] {
            table
                .handle(
                    RegistryMessage::Announce {
                        routes: vec![RouteIdentifier::global(rpc.clone())],
                        handle: handle.clone(),
                    },
                    &ctx,
                )
                .await
                .unwrap();
        }
        assert_eq!(view.handles_for(&rpc).len(), 2);

        table
            .handle(
                RegistryMessage::Withdraw {
                    routes: vec![RouteIdentifier::global(rpc.clone())],
                    handle: a,
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(view.handles_for(&rpc), BTreeSet::from([b.clone()]));

        table
            .handle(
                RegistryMessage::Withdraw {
                    routes: vec![RouteIdentifier::global(rpc.clone())],
                    handle: b,
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(view.global_routes(), 0);
    }

    #[tokio::test]
    async fn routing_table_applies_route_changes() {
        let mut table = RoutingTable::default();
        let view = table.view();
        let ctx = ctx(ChildKind::Registry, 1);
        let context = RoutingContext::new("tenant", "a:x");

        let change = RouteChange::default()
            .announce(context.clone(), "/1")
            .announce(context.clone(), "/2");
        table
            .handle(
                RegistryMessage::RouteChanged {
                    change,
                    handle: RoutingHandle::from("h"),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(view.paths_for(&context).len(), 2);

        let change = RouteChange::default()
            .remove(context.clone(), "/1")
            .remove(context.clone(), "/2");
        table
            .handle(
                RegistryMessage::RouteChanged {
                    change,
                    handle: RoutingHandle::from("h"),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert!(view.paths_for(&context).is_empty());
    }

    #[tokio::test]
    async fn local_dispatch_answers_known_rpcs_only() {
        let provider = Arc::new(InMemoryProvider::new([RpcId::from("a:x")]));
        let mut broker = LocalDispatch::new(provider);
        let ctx = ctx(ChildKind::Broker, 7);

        let (reply, answer) = oneshot::channel();
        broker
            .handle(
                BrokerMessage::Dispatch {
                    rpc: RpcId::from("a:x"),
                    input: json!({"id": 1}),
                    reply,
                },
                &ctx,
            )
            .await
            .unwrap();
        let result = answer.await.unwrap().unwrap();
        assert_eq!(result.output.unwrap()["schemaVersion"], json!(7));

        let (reply, answer) = oneshot::channel();
        broker
            .handle(
                BrokerMessage::Dispatch {
                    rpc: RpcId::from("b:y"),
                    input: json!(null),
                    reply,
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_matches!(answer.await.unwrap(), Err(RpcError::NoImplementation(r)) if r.as_str() == "b:y");
    }

    #[test]
    fn locator_and_factory() {
        let locator = StaticServiceLocator::new(&["topology"]);
        assert!(locator.locate(&CapabilityType::from("other")).is_none());

        let reference = locator.locate(&CapabilityType::from("topology")).unwrap();
        let proxy = PassthroughProxyFactory.create_proxy(reference).unwrap();
        let closeable = proxy.as_closeable().unwrap();
        closeable.close().unwrap();
        closeable.close().unwrap();

        let proxy = proxy.into_any().downcast::<PassthroughProxy>().unwrap();
        assert!(proxy.is_closed());
        assert_eq!(
            proxy.implementation().downcast_ref::<String>().map(String::as_str),
            Some("topology")
        );
    }
}
