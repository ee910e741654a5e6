//! Service location and proxy seams.
//!
//! The hosting mechanism that supplies service implementations is external.
//! A [`ServiceLocator`] resolves a [`CapabilityType`] to a
//! [`ServiceReference`]; a [`ProxyFactory`] wraps that reference in the
//! [`ServiceProxy`] a consumer actually holds.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rpcmesh_core::CapabilityType;

/// Type-erased service implementation.
pub type ServiceImpl = Arc<dyn Any + Send + Sync>;

/// A located service, as handed from locator to proxy factory.
#[derive(Clone)]
pub struct ServiceReference {
    /// Capability this service satisfies.
    pub capability: CapabilityType,
    /// Name of whatever registered the service.
    pub provider: String,
    /// The implementation itself.
    pub implementation: ServiceImpl,
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("capability", &self.capability)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Resolves capability types to service implementations.
pub trait ServiceLocator: Send + Sync {
    /// Locate the service for `capability`, or `None` if nothing provides it.
    fn locate(&self, capability: &CapabilityType) -> Option<ServiceReference>;
}

/// Wraps located services in consumer-facing proxies.
pub trait ProxyFactory: Send + Sync {
    /// Create the proxy for `reference`.
    fn create_proxy(&self, reference: ServiceReference) -> Result<Arc<dyn ServiceProxy>, ProxyError>;
}

/// A local stand-in that forwards calls to a located service.
pub trait ServiceProxy: Any + Send + Sync {
    /// Capability this proxy serves.
    fn capability(&self) -> &CapabilityType;

    /// The stoppable side of this proxy, if it has one.
    ///
    /// Sessions close every closeable proxy they cached when they close.
    fn as_closeable(&self) -> Option<&dyn CloseableProxy> {
        None
    }

    /// Upcast for typed access via [`SessionManager::get_service_as`](crate::SessionManager::get_service_as).
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl fmt::Debug for dyn ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("capability", self.capability())
            .finish_non_exhaustive()
    }
}

/// A proxy holding resources that must be released.
pub trait CloseableProxy: Send + Sync {
    /// Release the proxy's resources.
    fn close(&self) -> Result<(), ProxyError>;
}

/// Failure creating or closing a proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The factory cannot wrap this kind of service.
    #[error("Unsupported service implementation for {0}")]
    Unsupported(CapabilityType),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}
