//! Broker handle and the local session directory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use rpcmesh_core::{ConsumerId, RpcError, RpcFuture, RpcId, RpcInput, RpcInvoker, SessionId};
use tracing::{debug, info, instrument, warn};

use crate::errors::BrokerError;
use crate::service::{ProxyFactory, ServiceLocator};
use crate::session_manager::SessionManager;

/// What a session needs from the broker it is bound to.
pub trait BrokerHandle: RpcInvoker {
    /// Called exactly once when a bound session closes.
    fn consumer_session_closed(&self, session: &SessionId);
}

/// Broker that opens consumer sessions and forwards their RPCs.
///
/// Open sessions are tracked until they close. A session and the broker
/// reference each other while the session is open; closing the session (or
/// shutting the broker down) breaks the cycle.
pub struct LocalBroker {
    invoker: Arc<dyn RpcInvoker>,
    locator: Arc<dyn ServiceLocator>,
    factory: Arc<dyn ProxyFactory>,
    sessions: DashMap<SessionId, Arc<SessionManager>>,
    shut_down: AtomicBool,
    me: Weak<LocalBroker>,
}

impl LocalBroker {
    /// Create a broker dispatching RPCs through `invoker`.
    pub fn new(
        invoker: Arc<dyn RpcInvoker>,
        locator: Arc<dyn ServiceLocator>,
        factory: Arc<dyn ProxyFactory>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            invoker,
            locator,
            factory,
            sessions: DashMap::new(),
            shut_down: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// Open a session for `consumer`, bound to this broker.
    #[instrument(skip_all, fields(consumer = %consumer))]
    pub fn open_session(&self, consumer: ConsumerId) -> Result<Arc<SessionManager>, BrokerError> {
        if self.is_shut_down() {
            return Err(BrokerError::ShutDown);
        }
        let handle: Arc<dyn BrokerHandle> = self.me.upgrade().ok_or(BrokerError::ShutDown)?;

        let session = Arc::new(SessionManager::new(
            consumer,
            self.locator.clone(),
            self.factory.clone(),
        ));
        session.bind_broker(handle)?;
        let _ = self.sessions.insert(session.id().clone(), session.clone());

        // shutdown() may have drained the directory before our insert.
        if self.is_shut_down() {
            let _ = session.close();
            return Err(BrokerError::ShutDown);
        }

        debug!(session_id = %session.id(), "session opened");
        Ok(session)
    }

    /// Look up an open session.
    pub fn session(&self, id: &SessionId) -> Option<Arc<SessionManager>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Refuse new sessions and close every open one.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // Collect first: closing calls back into consumer_session_closed.
        let open: Vec<Arc<SessionManager>> =
            self.sessions.iter().map(|s| s.value().clone()).collect();
        let count = open.len();
        for session in open {
            if let Err(e) = session.close() {
                warn!(session_id = %session.id(), error = %e, "session close failed during shutdown");
            }
        }
        info!(sessions = count, "broker shut down");
    }
}

impl RpcInvoker for LocalBroker {
    fn invoke_rpc(&self, rpc: &RpcId, input: RpcInput) -> RpcFuture {
        if self.is_shut_down() {
            return futures::future::ready(Err(RpcError::BrokerUnavailable(
                "local broker is shut down".into(),
            )))
            .boxed();
        }
        self.invoker.invoke_rpc(rpc, input)
    }
}

impl BrokerHandle for LocalBroker {
    fn consumer_session_closed(&self, session: &SessionId) {
        if self.sessions.remove(session).is_some() {
            debug!(session_id = %session, "session removed from directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ProxyError, ServiceProxy, ServiceReference};
    use assert_matches::assert_matches;
    use rpcmesh_core::{CapabilityType, RpcResult};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingInvoker {
        calls: AtomicUsize,
    }

    impl RpcInvoker for CountingInvoker {
        fn invoke_rpc(&self, _rpc: &RpcId, input: RpcInput) -> RpcFuture {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(RpcResult::success(Some(input))) }.boxed()
        }
    }

    struct NoServices;

    impl ServiceLocator for NoServices {
        fn locate(&self, _capability: &CapabilityType) -> Option<ServiceReference> {
            None
        }
    }

    impl ProxyFactory for NoServices {
        fn create_proxy(
            &self,
            reference: ServiceReference,
        ) -> Result<Arc<dyn ServiceProxy>, ProxyError> {
            Err(ProxyError::Unsupported(reference.capability))
        }
    }

    fn broker() -> (Arc<LocalBroker>, Arc<CountingInvoker>) {
        let invoker = Arc::new(CountingInvoker::default());
        let broker = LocalBroker::new(invoker.clone(), Arc::new(NoServices), Arc::new(NoServices));
        (broker, invoker)
    }

    #[test]
    fn open_session_binds_and_tracks() {
        let (broker, _) = broker();
        let session = broker.open_session(ConsumerId::from("inventory-app")).unwrap();
        assert_eq!(session.consumer().as_str(), "inventory-app");
        assert_eq!(broker.session_count(), 1);
        assert!(broker.session(session.id()).is_some());
        // Bound: lookups work and miss cleanly.
        assert_matches!(session.get_service(&CapabilityType::from("x")), Ok(None));
    }

    #[test]
    fn closing_a_session_removes_it() {
        let (broker, _) = broker();
        let session = broker.open_session(ConsumerId::new()).unwrap();
        session.close().unwrap();
        assert_eq!(broker.session_count(), 0);
        assert!(broker.session(session.id()).is_none());
    }

    #[tokio::test]
    async fn session_rpc_reaches_invoker() {
        let (broker, invoker) = broker();
        let session = broker.open_session(ConsumerId::new()).unwrap();
        let result = session
            .rpc(&RpcId::from("a:b"), json!({"k": "v"}))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result.output, Some(json!({"k": "v"})));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_sessions_and_refuses_new_ones() {
        let (broker, invoker) = broker();
        let a = broker.open_session(ConsumerId::new()).unwrap();
        let b = broker.open_session(ConsumerId::new()).unwrap();

        broker.shutdown();
        broker.shutdown();

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(broker.session_count(), 0);
        assert_matches!(
            broker.open_session(ConsumerId::new()),
            Err(BrokerError::ShutDown)
        );

        let direct = broker.invoke_rpc(&RpcId::from("a:b"), json!(null)).await;
        assert_matches!(direct, Err(RpcError::BrokerUnavailable(_)));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }
}
