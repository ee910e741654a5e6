//! # rpcmesh-node
//!
//! Node binary: loads settings, starts the RPC supervisor over the in-memory
//! provider, puts a local broker in front of it and serves one consumer
//! session until interrupted or until the RPC subsystem escalates.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rpcmesh_broker::LocalBroker;
use rpcmesh_core::{CapabilityType, ConsumerId, SchemaSnapshot};
use rpcmesh_node::{
    InMemoryProvider, LocalDispatch, PassthroughProxyFactory, RoutingTable, StaticServiceLocator,
};
use rpcmesh_remote::{ProviderSession, RpcSupervisor, SupervisorConfig, SupervisorState};
use rpcmesh_settings::NodeSettings;
use serde_json::json;
use tracing::{error, info, warn};

/// rpcmesh node.
#[derive(Parser, Debug)]
#[command(name = "rpcmesh-node", about = "rpcmesh RPC node")]
struct Cli {
    /// Settings file (defaults to `~/.rpcmesh/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Cluster address of this node (overrides settings).
    #[arg(long)]
    cluster_address: Option<String>,

    /// Log level (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Consumer identity for the demo session.
    #[arg(long, default_value = "rpcmesh-node")]
    consumer: String,
}

impl Cli {
    fn load_settings(&self) -> Result<NodeSettings> {
        let mut settings = match &self.settings {
            Some(path) => rpcmesh_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => rpcmesh_settings::load_settings().unwrap_or_default(),
        };
        if let Some(address) = &self.cluster_address {
            settings.cluster.address.clone_from(address);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    rpcmesh_core::logging::init_subscriber(&settings.logging.level);
    if rpcmesh_settings::init_settings(settings).is_err() {
        bail!("settings initialized twice");
    }
    let settings = rpcmesh_settings::get_settings();

    // RPC supervision tree
    let provider = Arc::new(InMemoryProvider::new(settings.provider.rpc_ids()));
    let schema = settings
        .provider
        .rpc_ids()
        .into_iter()
        .fold(SchemaSnapshot::new(1), |schema, rpc| schema.with_rpc(rpc));
    let table = RoutingTable::default();
    let routes = table.view();
    let supervisor = RpcSupervisor::start(
        SupervisorConfig::from_settings(settings),
        settings.cluster.cluster_address(),
        schema,
        provider.as_ref(),
        table,
        LocalDispatch::new(provider.clone()),
    )
    .await
    .context("Failed to start RPC supervisor")?;

    // Consumer side
    let broker = LocalBroker::new(
        supervisor.invoker(),
        Arc::new(StaticServiceLocator::new(&settings.provider.services)),
        Arc::new(PassthroughProxyFactory),
    );
    let session = broker
        .open_session(ConsumerId::from(args.consumer.as_str()))
        .context("Failed to open consumer session")?;

    for capability in &settings.provider.services {
        let capability = CapabilityType::from(capability.as_str());
        match session.get_service(&capability)? {
            Some(_) => info!(capability = %capability, "service ready"),
            None => warn!(capability = %capability, "service not available"),
        }
    }
    for rpc in provider.supported_rpcs() {
        match session.rpc(&rpc, json!({}))?.await {
            Ok(result) => info!(rpc = %rpc, successful = result.successful, "probe rpc completed"),
            Err(e) => warn!(rpc = %rpc, error = %e, category = e.category(), "probe rpc failed"),
        }
    }

    info!(
        session_id = %session.id(),
        routing_handle = %supervisor.routing_handle(),
        route_listeners = provider.route_listener_count(),
        "rpcmesh node ready"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("shutdown requested");
        }
        state = supervisor.wait_for_termination() => {
            error!(?state, "rpc subsystem terminated");
        }
    }

    if let Err(e) = session.close() {
        warn!(error = %e, "consumer session did not close cleanly");
    }
    broker.shutdown();
    supervisor.shutdown().await;
    info!(known_routes = routes.global_routes(), "rpcmesh node stopped");

    if let SupervisorState::Escalated { child, faults } = supervisor.state() {
        bail!("RPC subsystem escalated after {faults} faults in {child}");
    }
    Ok(())
}
