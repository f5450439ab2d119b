//! Raw TCP tunnel relay
//!
//! A reverse tunnel for screen-sharing clients behind NAT: the agent
//! dials out to the server's relay endpoint, authenticates with a single
//! framed line, dials the local target service, and then copies bytes
//! both ways without interpreting them. The relay is configured at
//! startup and runs beside the control channel, not inside it; no control
//! message starts or stops it.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::error::Result;
use crate::identity::Identity;

/// Copy unit for each relay direction.
const CHUNK_SIZE: usize = 4096;

/// Wait between relay attempts after any terminal condition.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Which side ended a relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The server relay closed its side
    Server,
    /// The local target service closed its side
    Local,
}

/// One configured tunnel: server relay endpoint plus local target port.
pub struct TunnelRelay {
    relay_addr: String,
    local_port: u16,
    identity: Arc<Identity>,
    token: String,
}

impl TunnelRelay {
    /// Create a relay towards `relay_addr`, forwarding to
    /// `127.0.0.1:local_port`.
    pub fn new(relay_addr: String, local_port: u16, identity: Arc<Identity>, token: String) -> Self {
        Self {
            relay_addr,
            local_port,
            identity,
            token,
        }
    }

    /// Spawn the relay loop. It reconnects with a fixed backoff for the
    /// life of the process; the handle exists for shutdown tests, not
    /// supervision.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(relay = %self.relay_addr, local_port = self.local_port, "tunnel relay starting");
            loop {
                match self.run_once().await {
                    Ok(end) => info!(?end, "tunnel closed, reconnecting in {RETRY_DELAY:?}"),
                    Err(e) => warn!(error = %e, "tunnel error, reconnecting in {RETRY_DELAY:?}"),
                }
                sleep(RETRY_DELAY).await;
            }
        })
    }

    /// One relay attempt: connect, authenticate, relay until either side
    /// ends. Both sockets are dropped together on every exit path.
    pub async fn run_once(&self) -> Result<RelayEnd> {
        let mut relay = TcpStream::connect(&self.relay_addr).await?;

        // Fire-and-forget handshake: the server validates or drops us.
        let handshake = format!("TUNNEL_AUTH:{}:{}\n", self.identity.agent_id(), self.token);
        relay.write_all(handshake.as_bytes()).await?;
        info!(relay = %self.relay_addr, "tunnel authenticated");

        let local = TcpStream::connect(("127.0.0.1", self.local_port)).await?;
        info!(local_port = self.local_port, "connected to local target");

        relay_data(relay, local).await
    }
}

/// Byte-transparent bidirectional copy. Readiness multiplexing over the
/// two read halves; a zero-length read on either side ends the relay, and
/// returning drops all four halves, closing both sockets together.
async fn relay_data(relay: TcpStream, local: TcpStream) -> Result<RelayEnd> {
    let (mut relay_rx, mut relay_tx) = relay.into_split();
    let (mut local_rx, mut local_tx) = local.into_split();

    let mut from_relay = [0u8; CHUNK_SIZE];
    let mut from_local = [0u8; CHUNK_SIZE];

    loop {
        tokio::select! {
            read = relay_rx.read(&mut from_relay) => {
                let n = read?;
                if n == 0 {
                    return Ok(RelayEnd::Server);
                }
                local_tx.write_all(&from_relay[..n]).await?;
            }
            read = local_rx.read(&mut from_local) => {
                let n = read?;
                if n == 0 {
                    return Ok(RelayEnd::Local);
                }
                relay_tx.write_all(&from_local[..n]).await?;
            }
        }
    }
}
