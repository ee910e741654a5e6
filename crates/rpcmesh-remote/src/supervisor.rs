//! RPC supervisor.
//!
//! Owns the Registry and Broker children and the schema context. Startup
//! order is fixed: spawn children, subscribe listeners to the provider,
//! then announce the RPCs the provider already supports. Only after the last
//! announcement is queued does the subsystem report `Running`.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use rpcmesh_core::{
    ClusterAddress, RoutingHandle, RpcInvoker, SchemaReader, SchemaSnapshot, SchemaWriter,
    schema_holder,
};
use rpcmesh_settings::NodeSettings;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::child::{
    BrokerBehavior, ChildContext, ChildKind, ChildRef, FaultReport, RegistryBehavior, spawn_child,
};
use crate::delegate::RemoteRpcImplementation;
use crate::errors::SupervisionError;
use crate::listener::{RoutedRpcListener, RpcListener};
use crate::messages::{BrokerMessage, RegistryMessage};
use crate::policy::{Directive, FaultPolicy, FaultWindow, RestartPolicy, ResumeAll};
use crate::provider::ProviderSession;

/// Children hold at most one outstanding report each.
const FAULT_QUEUE: usize = 8;
const CONTROL_QUEUE: usize = 16;

/// How the supervisor is set up.
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Fault budget per child.
    pub restart_policy: RestartPolicy,
    /// Directive for faults within budget.
    pub fault_policy: Arc<dyn FaultPolicy>,
    /// Capacity of each child's mailbox.
    pub mailbox_capacity: usize,
    /// Suffix turning the cluster address into the broker routing handle.
    pub broker_path: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::default(),
            fault_policy: Arc::new(ResumeAll),
            mailbox_capacity: 1024,
            broker_path: "/user/rpc/rpc-broker".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Config derived from node settings, resuming every fault.
    pub fn from_settings(settings: &NodeSettings) -> Self {
        Self {
            restart_policy: RestartPolicy::from(&settings.supervision),
            fault_policy: Arc::new(ResumeAll),
            mailbox_capacity: settings.supervision.mailbox_capacity,
            broker_path: settings.cluster.broker_path.clone(),
        }
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("restart_policy", &self.restart_policy)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("broker_path", &self.broker_path)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of the RPC subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    /// Children spawned, startup announcements still being queued.
    Uninitialized,
    /// Children running, listeners registered.
    Running,
    /// A child exhausted its fault budget; everything is stopped.
    Escalated {
        /// Child that exhausted its budget.
        child: ChildKind,
        /// Faults inside the window at escalation.
        faults: usize,
    },
    /// Shut down on request.
    Stopped,
}

impl SupervisorState {
    /// Whether the subsystem has ended for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated { .. } | Self::Stopped)
    }
}

enum ControlMessage {
    Started {
        ack: oneshot::Sender<()>,
    },
    UpdateSchemaContext {
        snapshot: SchemaSnapshot,
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running RPC supervision tree.
///
/// Dropping the handle stops the children.
pub struct RpcSupervisor {
    cluster: ClusterAddress,
    routing_handle: RoutingHandle,
    schema: SchemaReader,
    control: mpsc::Sender<ControlMessage>,
    state: watch::Receiver<SupervisorState>,
    registry: ChildRef<RegistryMessage>,
    broker: ChildRef<BrokerMessage>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcSupervisor {
    /// Spawn the children, subscribe to `provider` and announce its RPCs.
    ///
    /// Must run inside a tokio runtime. The provider is not retained.
    /// Resolves once every supported RPC has been queued on the Registry,
    /// waiting for mailbox capacity where needed, and the subsystem is
    /// `Running`.
    #[instrument(skip_all, fields(cluster = %cluster))]
    pub async fn start<R, B>(
        config: SupervisorConfig,
        cluster: ClusterAddress,
        schema: SchemaSnapshot,
        provider: &dyn ProviderSession,
        registry: R,
        broker: B,
    ) -> Result<Self, SupervisionError>
    where
        R: RegistryBehavior,
        B: BrokerBehavior,
    {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SupervisionError::NoRuntime)?;
        let routing_handle = RoutingHandle::for_broker(&cluster, &config.broker_path);
        let (writer, reader) = schema_holder(schema);
        let (state_tx, state_rx) = watch::channel(SupervisorState::Uninitialized);
        let (fault_tx, fault_rx) = mpsc::channel(FAULT_QUEUE);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        let cancel = CancellationToken::new();

        let context = |kind| {
            ChildContext::new(kind, cluster.clone(), routing_handle.clone(), reader.clone())
        };
        let (registry_ref, registry_task) = spawn_child(
            &runtime,
            registry,
            context(ChildKind::Registry),
            config.mailbox_capacity,
            fault_tx.clone(),
            cancel.child_token(),
        );
        let (broker_ref, broker_task) = spawn_child(
            &runtime,
            broker,
            context(ChildKind::Broker),
            config.mailbox_capacity,
            fault_tx,
            cancel.child_token(),
        );
        debug!("rpc children spawned");

        // Faults raised while the startup batch is queued are handled as usual.
        let supervision = Supervision {
            restart_policy: config.restart_policy,
            fault_policy: config.fault_policy,
            windows: HashMap::new(),
            writer,
            state: state_tx,
            faults: fault_rx,
            control: control_rx,
            cancel: cancel.clone(),
            children: vec![registry_task, broker_task],
        };
        let task = runtime.spawn(supervision.run());

        let supervisor = Self {
            cluster,
            routing_handle,
            schema: reader,
            control: control_tx,
            state: state_rx,
            registry: registry_ref,
            broker: broker_ref,
            cancel,
            task: Mutex::new(Some(task)),
        };

        let rpc_listener = Arc::new(RpcListener::new(
            supervisor.registry.clone(),
            supervisor.routing_handle.clone(),
        ));
        provider.add_rpc_registration_listener(rpc_listener.clone());
        provider.register_route_change_listener(Arc::new(RoutedRpcListener::new(
            supervisor.registry.clone(),
            supervisor.routing_handle.clone(),
        )));
        provider.set_routed_rpc_default_delegate(Arc::new(RemoteRpcImplementation::new(
            supervisor.broker.clone(),
        )));

        let supported = provider.supported_rpcs();
        let announced = rpc_listener.announce_all(&supported).await;
        if announced < supported.len() {
            warn!(
                supported = supported.len(),
                announced, "not every supported rpc could be announced"
            );
        }

        let (ack, started) = oneshot::channel();
        supervisor
            .control
            .send(ControlMessage::Started { ack })
            .await
            .map_err(|_| supervisor.unavailable())?;
        started.await.map_err(|_| supervisor.unavailable())?;

        info!(
            routing_handle = %supervisor.routing_handle,
            announced,
            "rpc supervisor started"
        );
        Ok(supervisor)
    }

    /// Atomically replace the schema context seen by both children.
    ///
    /// Resolves once the new snapshot is installed; messages handled after
    /// that observe it.
    pub async fn update_schema_context(
        &self,
        snapshot: SchemaSnapshot,
    ) -> Result<(), SupervisionError> {
        if self.state().is_terminal() {
            return Err(self.unavailable());
        }
        let (ack, installed) = oneshot::channel();
        self.control
            .send(ControlMessage::UpdateSchemaContext { snapshot, ack })
            .await
            .map_err(|_| self.unavailable())?;
        installed.await.map_err(|_| self.unavailable())
    }

    /// Invoker dispatching through the Broker child.
    pub fn invoker(&self) -> Arc<dyn RpcInvoker> {
        Arc::new(RemoteRpcImplementation::new(self.broker.clone()))
    }

    /// Sending side of the Registry mailbox.
    pub fn registry(&self) -> &ChildRef<RegistryMessage> {
        &self.registry
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.state.borrow().clone()
    }

    /// Resolve once the subsystem has escalated or stopped.
    pub async fn wait_for_termination(&self) -> SupervisorState {
        let mut state = self.state.clone();
        match state.wait_for(SupervisorState::is_terminal).await {
            Ok(terminal) => terminal.clone(),
            Err(_) => self.state(),
        }
    }

    /// Address of the local node.
    pub fn cluster(&self) -> &ClusterAddress {
        &self.cluster
    }

    /// Routing handle announced with every route.
    pub fn routing_handle(&self) -> &RoutingHandle {
        &self.routing_handle
    }

    /// Schema snapshot currently installed.
    pub fn schema(&self) -> Arc<SchemaSnapshot> {
        self.schema.load()
    }

    /// Stop both children and wait for them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "rpc supervisor task failed");
            }
        }
    }

    fn unavailable(&self) -> SupervisionError {
        match self.state() {
            SupervisorState::Escalated { child, faults } => {
                SupervisionError::Escalated { child, faults }
            }
            other => SupervisionError::NotRunning(other),
        }
    }
}

impl fmt::Debug for RpcSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcSupervisor")
            .field("routing_handle", &self.routing_handle)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for RpcSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the supervisor task.
struct Supervision {
    restart_policy: RestartPolicy,
    fault_policy: Arc<dyn FaultPolicy>,
    windows: HashMap<ChildKind, FaultWindow>,
    writer: SchemaWriter,
    state: watch::Sender<SupervisorState>,
    faults: mpsc::Receiver<FaultReport>,
    control: mpsc::Receiver<ControlMessage>,
    cancel: CancellationToken,
    children: Vec<JoinHandle<()>>,
}

impl Supervision {
    async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                biased;
                () = self.cancel.cancelled() => self.stop(),
                report = self.faults.recv() => match report {
                    Some(report) => self.on_fault(report),
                    None => self.stop(),
                },
                message = self.control.recv() => match message {
                    Some(message) => self.on_control(message),
                    None => self.stop(),
                },
            };
            if flow.is_break() {
                break;
            }
        }

        self.control.close();
        self.faults.close();
        self.cancel.cancel();
        for child in self.children.drain(..) {
            if let Err(e) = child.await {
                warn!(error = %e, "rpc child task failed");
            }
        }
        debug!("rpc supervisor stopped");
    }

    fn on_fault(&mut self, report: FaultReport) -> ControlFlow<()> {
        let FaultReport {
            child,
            fault,
            reply,
        } = report;
        let restart_policy = self.restart_policy;
        let window = self
            .windows
            .entry(child)
            .or_insert_with(|| FaultWindow::new(restart_policy));
        let within_budget = window.record(Instant::now());
        let faults = window.len();

        let directive = if within_budget {
            self.fault_policy.decide(child, &fault)
        } else {
            Directive::Escalate
        };

        match directive {
            Directive::Resume => {
                warn!(
                    child = %child,
                    faults,
                    category = fault.category(),
                    error = %fault,
                    "rpc child faulted, resuming"
                );
                let _ = reply.send(Directive::Resume);
                ControlFlow::Continue(())
            }
            Directive::Escalate => {
                error!(
                    child = %child,
                    faults,
                    category = fault.category(),
                    error = %fault,
                    "rpc child fault budget exhausted, escalating"
                );
                let _ = reply.send(Directive::Escalate);
                let _ = self
                    .state
                    .send_replace(SupervisorState::Escalated { child, faults });
                ControlFlow::Break(())
            }
        }
    }

    fn on_control(&mut self, message: ControlMessage) -> ControlFlow<()> {
        match message {
            ControlMessage::Started { ack } => {
                let _ = self.state.send_if_modified(|state| {
                    if *state == SupervisorState::Uninitialized {
                        *state = SupervisorState::Running;
                        true
                    } else {
                        false
                    }
                });
                let _ = ack.send(());
            }
            ControlMessage::UpdateSchemaContext { snapshot, ack } => {
                let version = snapshot.version();
                let previous = self.writer.replace(snapshot);
                info!(
                    from = previous.version(),
                    to = version,
                    "schema context updated"
                );
                let _ = ack.send(());
            }
        }
        ControlFlow::Continue(())
    }

    fn stop(&mut self) -> ControlFlow<()> {
        let _ = self.state.send_replace(SupervisorState::Stopped);
        info!("rpc supervisor stopping");
        ControlFlow::Break(())
    }
}
