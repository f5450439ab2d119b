//! Remora Agent Binary
//!
//! Wires the components together and supervises the control channel
//! until the process is stopped.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use remora_agent::capture::{DiscardInputSink, TestCardSource};
use remora_agent::updates::PackageManager;
use remora_agent::{
    AgentConfig, ChannelSink, Connection, Dispatcher, Identity, ShellSessions, TunnelRelay,
    VncController,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(AgentConfig::parse());
    let identity = Arc::new(Identity::from_config(&config));
    info!(agent_id = %identity.agent_id(), hostname = %identity.hostname, "starting remora agent");

    let sink = ChannelSink::new();
    let sessions = ShellSessions::new(Arc::clone(&identity), sink.clone());
    let vnc = VncController::new(
        Arc::clone(&identity),
        sink.clone(),
        Arc::new(TestCardSource::new()),
    );
    let dispatcher = Dispatcher::new(
        Arc::clone(&identity),
        sink.clone(),
        sessions,
        vnc,
        Arc::new(PackageManager::new()),
        Arc::new(DiscardInputSink::new()),
    );

    // The tunnel relay is a sibling of the control channel, enabled by
    // configuration alone.
    if let Some(relay_addr) = config.tunnel_addr.clone() {
        TunnelRelay::new(
            relay_addr,
            config.tunnel_port,
            Arc::clone(&identity),
            config.token.clone(),
        )
        .spawn();
    }

    let connection = Connection::new(config, identity, sink, dispatcher);
    tokio::select! {
        _ = connection.run() => {}
        _ = tokio::signal::ctrl_c() => info!("agent stopped"),
    }

    Ok(())
}
