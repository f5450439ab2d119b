//! Immutable process configuration
//!
//! Built once at startup from CLI flags and environment variables and
//! passed by reference from then on; nothing mutates it afterwards.

use clap::Parser;

/// Agent configuration.
///
/// Every field can be supplied as a flag or through the environment
/// variable named in its attribute.
#[derive(Debug, Clone, Parser)]
#[command(name = "remora-agent", about = "Remote-management agent", version)]
pub struct AgentConfig {
    /// WebSocket URL of the central server
    #[arg(long, env = "RMM_SERVER", default_value = "ws://localhost:3000")]
    pub server_url: String,

    /// Shared secret presented in the auth message and tunnel handshake
    #[arg(long, env = "RMM_TOKEN", default_value = "your-secret-agent-token-change-this")]
    pub token: String,

    /// Customer label reported at authentication
    #[arg(long, env = "RMM_CUSTOMER", default_value = "Default")]
    pub customer: String,

    /// Site label reported at authentication
    #[arg(long, env = "RMM_SITE", default_value = "Default")]
    pub site: String,

    /// host:port of the server's tunnel relay endpoint; the relay stays
    /// off when unset
    #[arg(long, env = "RMM_TUNNEL_ADDR")]
    pub tunnel_addr: Option<String>,

    /// Local port the tunnel forwards to (a VNC server, typically)
    #[arg(long, env = "RMM_TUNNEL_PORT", default_value_t = 5900)]
    pub tunnel_port: u16,
}
