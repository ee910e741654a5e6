//! Per-consumer session: proxy cache, RPC forwarding and close lifecycle.
//!
//! A [`SessionManager`] is created when a consumer attaches to the broker and
//! is torn down exactly once by [`SessionManager::close`]. After that it is
//! inert: it hands out no proxies and dispatches no RPCs.
//!
//! The proxy cache is populated with compare-and-set. Lookup and proxy
//! creation run without holding any lock; when two callers race on the same
//! capability the first insert wins, the loser's proxy is closed and
//! discarded, and both callers get the winning instance.
//!
//! RPC futures already handed out are not cancelled by `close()`.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rpcmesh_core::{CapabilityType, ConsumerId, RpcFuture, RpcId, RpcInput, SessionId};
use tracing::{debug, warn};

use crate::broker::BrokerHandle;
use crate::errors::SessionError;
use crate::service::{ProxyFactory, ServiceLocator, ServiceProxy};

/// One consumer's session with the broker.
pub struct SessionManager {
    id: SessionId,
    consumer: ConsumerId,
    locator: Arc<dyn ServiceLocator>,
    factory: Arc<dyn ProxyFactory>,
    proxies: DashMap<CapabilityType, Arc<dyn ServiceProxy>>,
    broker: OnceLock<Arc<dyn BrokerHandle>>,
    closed: Mutex<bool>,
}

impl SessionManager {
    /// Create an open session with no broker bound yet.
    pub fn new(
        consumer: ConsumerId,
        locator: Arc<dyn ServiceLocator>,
        factory: Arc<dyn ProxyFactory>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            consumer,
            locator,
            factory,
            proxies: DashMap::new(),
            broker: OnceLock::new(),
            closed: Mutex::new(false),
        }
    }

    /// Session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Consumer owning this session.
    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    /// Bind the broker this session forwards to. Allowed once.
    pub fn bind_broker(&self, broker: Arc<dyn BrokerHandle>) -> Result<(), SessionError> {
        self.broker
            .set(broker)
            .map_err(|_| SessionError::BrokerAlreadyBound)
    }

    fn broker(&self) -> Result<&Arc<dyn BrokerHandle>, SessionError> {
        self.broker.get().ok_or(SessionError::BrokerNotBound)
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.id.clone()));
        }
        Ok(())
    }

    /// Get the proxy for `capability`, creating and caching it on first use.
    ///
    /// Returns `Ok(None)` when no service provides the capability.
    pub fn get_service(
        &self,
        capability: &CapabilityType,
    ) -> Result<Option<Arc<dyn ServiceProxy>>, SessionError> {
        let _ = self.broker()?;
        self.ensure_open()?;

        if let Some(cached) = self.proxies.get(capability).map(|p| p.value().clone()) {
            return Ok(Some(cached));
        }

        let Some(reference) = self.locator.locate(capability) else {
            debug!(session_id = %self.id, %capability, "capability not provided");
            return Ok(None);
        };

        let proxy = self.factory.create_proxy(reference).map_err(|e| {
            SessionError::ProxyInstantiation {
                capability: capability.clone(),
                message: e.to_string(),
            }
        })?;

        let winner = match self.proxies.entry(capability.clone()) {
            Entry::Occupied(existing) => {
                let winner = existing.get().clone();
                drop(existing);
                debug!(session_id = %self.id, %capability, "lost proxy race, discarding");
                let _ = self.close_proxy(capability, &proxy);
                winner
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(proxy.clone());
                debug!(session_id = %self.id, %capability, "proxy cached");
                proxy
            }
        };

        // close() may have drained the cache between ensure_open and the insert.
        if self.is_closed() {
            if let Some((_, orphan)) = self
                .proxies
                .remove_if(capability, |_, p| Arc::ptr_eq(p, &winner))
            {
                let _ = self.close_proxy(capability, &orphan);
            }
            return Err(SessionError::Closed(self.id.clone()));
        }

        Ok(Some(winner))
    }

    /// Typed variant of [`get_service`](Self::get_service).
    pub fn get_service_as<P: ServiceProxy>(
        &self,
        capability: &CapabilityType,
    ) -> Result<Option<Arc<P>>, SessionError> {
        let Some(proxy) = self.get_service(capability)? else {
            return Ok(None);
        };
        proxy
            .into_any()
            .downcast::<P>()
            .map(Some)
            .map_err(|_| SessionError::ProxyTypeMismatch {
                capability: capability.clone(),
                expected: std::any::type_name::<P>(),
            })
    }

    /// Forward an RPC to the broker. The payload is passed through untouched.
    pub fn rpc(&self, rpc: &RpcId, input: RpcInput) -> Result<RpcFuture, SessionError> {
        let broker = self.broker()?;
        self.ensure_open()?;
        Ok(broker.invoke_rpc(rpc, input))
    }

    /// Close the session.
    ///
    /// The first call closes every cached closeable proxy and notifies the
    /// broker; later calls do nothing. Each proxy close is attempted even if
    /// an earlier one failed; the first failure is returned.
    pub fn close(&self) -> Result<(), SessionError> {
        let broker = self.broker()?.clone();
        {
            let mut closed = self.closed.lock();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        let capabilities: Vec<CapabilityType> =
            self.proxies.iter().map(|e| e.key().clone()).collect();

        let mut first_failure = None;
        for capability in capabilities {
            // A racing get_service may already have removed and closed it.
            let Some((capability, proxy)) = self.proxies.remove(&capability) else {
                continue;
            };
            if let Err(e) = self.close_proxy(&capability, &proxy) {
                let _ = first_failure.get_or_insert(e);
            }
        }

        broker.consumer_session_closed(&self.id);
        debug!(session_id = %self.id, consumer = %self.consumer, "session closed");

        first_failure.map_or(Ok(()), Err)
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Number of cached proxies.
    pub fn cached_proxy_count(&self) -> usize {
        self.proxies.len()
    }

    fn close_proxy(
        &self,
        capability: &CapabilityType,
        proxy: &Arc<dyn ServiceProxy>,
    ) -> Result<(), SessionError> {
        let Some(closeable) = proxy.as_closeable() else {
            return Ok(());
        };
        closeable.close().map_err(|e| {
            warn!(session_id = %self.id, %capability, error = %e, "proxy close failed");
            SessionError::ProxyClose {
                capability: capability.clone(),
                message: e.to_string(),
            }
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("id", &self.id)
            .field("consumer", &self.consumer)
            .field("proxies", &self.proxies.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
