//! Control-channel supervision: connect, authenticate, heartbeat, receive
//!
//! The connection manager owns the single logical control channel. It
//! dials the server, authenticates with identity plus a fresh telemetry
//! snapshot, keeps a heartbeat task alive while connected, and feeds
//! every decoded inbound message to the dispatcher. Any channel-level
//! fault falls through to the reconnect loop; everything below that level
//! is reported in-band and never reaches here.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use remora_proto::{AgentMessage, ServerMessage};

use crate::channel::ChannelSink;
use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::identity::Identity;
use crate::telemetry;

/// Receive half of the control-channel socket.
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Supervision intervals.
///
/// The defaults are the production policy: a fixed 5 s reconnect backoff
/// (deliberately unbounded retries; staying connected is the agent's only
/// job) and a 30 s heartbeat. Tests inject shorter values.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wait between connection attempts
    pub reconnect_delay: Duration,
    /// Wait between heartbeats while connected
    pub heartbeat_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Owner of the control channel and top-level supervisory loop.
pub struct Connection {
    config: Arc<AgentConfig>,
    identity: Arc<Identity>,
    sink: ChannelSink,
    dispatcher: Dispatcher,
    timing: Timing,
}

impl Connection {
    /// Create the connection manager with production timing.
    pub fn new(
        config: Arc<AgentConfig>,
        identity: Arc<Identity>,
        sink: ChannelSink,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            config,
            identity,
            sink,
            dispatcher,
            timing: Timing::default(),
        }
    }

    /// Override the supervision intervals.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Supervisory loop; never returns under normal operation.
    ///
    /// Every termination of a connection attempt, clean or not, waits the
    /// fixed backoff and tries again.
    pub async fn run(&self) {
        loop {
            match self.connect_once().await {
                Ok(()) => info!("connection closed"),
                Err(e) => warn!(error = %e, "connection error"),
            }
            self.sink.clear();
            sleep(self.timing.reconnect_delay).await;
        }
    }

    /// One connection lifetime: dial, authenticate, pump, receive.
    async fn connect_once(&self) -> Result<()> {
        info!(url = %self.config.server_url, "connecting to server");
        let (ws, _) = connect_async(self.config.server_url.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Fresh outbound queue per connection; worker tasks reach it
        // through the sink, the pump serialises onto the socket.
        let (tx, mut outbound) = mpsc::unbounded_channel::<AgentMessage>();
        let pump = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "dropping unencodable outbound message");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                    warn!(error = %e, "outbound send failed");
                    break;
                }
            }
        });
        self.sink.install(tx);

        // Authentication is always the first message on the wire.
        let system_info = telemetry::snapshot().await;
        let auth = AgentMessage::Auth {
            token: self.config.token.clone(),
            agent_id: self.identity.agent_id(),
            hostname: self.identity.hostname.clone(),
            os: self.identity.os.clone(),
            version: self.identity.version.clone(),
            customer: self.identity.customer.clone(),
            site: self.identity.site.clone(),
            system_info,
        };
        let auth_result = self.sink.send(auth);

        let result = match auth_result {
            Err(e) => Err(e),
            Ok(()) => {
                info!(agent_id = %self.identity.agent_id(), "connected to server");

                let heartbeat = tokio::spawn(heartbeat_loop(
                    Arc::clone(&self.identity),
                    self.sink.clone(),
                    self.timing.heartbeat_interval,
                ));

                let received = self.receive_loop(&mut ws_rx).await;

                heartbeat.abort();
                received
            }
        };

        self.sink.clear();
        pump.abort();
        result
    }

    /// Drain inbound frames until the peer closes or the transport
    /// fails. Decode failures are dropped with a diagnostic and the
    /// channel stays up.
    async fn receive_loop(&self, ws_rx: &mut WsStream) -> Result<()> {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(message) => self.dispatcher.dispatch(message).await,
                    Err(e) => warn!(error = %e, "dropping undecodable message"),
                },
                Ok(WsMessage::Close(_)) => {
                    info!("server closed the channel");
                    break;
                }
                // Binary frames and transport pings carry nothing for us.
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Periodic liveness reports. Failures are logged, never fatal; the task
/// runs until the connection manager aborts it.
async fn heartbeat_loop(identity: Arc<Identity>, sink: ChannelSink, interval: Duration) {
    loop {
        sleep(interval).await;
        let system_info = telemetry::snapshot().await;
        let message = AgentMessage::Heartbeat {
            agent_id: identity.agent_id(),
            system_info,
        };
        if let Err(e) = sink.send(message) {
            warn!(error = %e, "heartbeat send failed");
        }
    }
}
