//! Outbound control-channel sink
//!
//! Every component that reports to the server goes through [`ChannelSink`]:
//! a process-wide slot holding the current connection's outbound queue.
//! The connection manager installs a fresh sender on each successful
//! connect and clears it on disconnect, so at most one channel is ever
//! active and sends while disconnected are rejected at the sink.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use remora_proto::AgentMessage;

use crate::error::{AgentError, Result};

/// Cloneable handle to the current outbound queue.
///
/// Worker tasks (shell sessions, the capture loop, update runners) hold
/// clones and push completed events here; the connection manager's pump
/// drains the queue onto the WebSocket. The queue is unbounded; no
/// backpressure is applied to producers.
#[derive(Debug, Clone, Default)]
pub struct ChannelSink {
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<AgentMessage>>>>,
}

impl ChannelSink {
    /// Create a sink with no active channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the sender for a newly established channel, replacing any
    /// previous one.
    pub(crate) fn install(&self, tx: mpsc::UnboundedSender<AgentMessage>) {
        *self.slot.lock().expect("channel slot poisoned") = Some(tx);
    }

    /// Drop the active sender; subsequent sends are rejected until the
    /// next install.
    pub(crate) fn clear(&self) {
        *self.slot.lock().expect("channel slot poisoned") = None;
    }

    /// Queue one message for the server.
    ///
    /// Fails with [`AgentError::ChannelClosed`] when no channel is active
    /// or the pump for the installed one has already gone away.
    pub fn send(&self, message: AgentMessage) -> Result<()> {
        let slot = self.slot.lock().expect("channel slot poisoned");
        match slot.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| AgentError::ChannelClosed),
            None => Err(AgentError::ChannelClosed),
        }
    }

    /// Whether a channel is currently installed.
    pub fn is_connected(&self) -> bool {
        self.slot.lock().expect("channel slot poisoned").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> AgentMessage {
        AgentMessage::Heartbeat {
            agent_id: "a".to_string(),
            system_info: remora_proto::SystemInfo::Error {
                error: "test".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn sends_are_rejected_while_disconnected() {
        let sink = ChannelSink::new();
        assert!(!sink.is_connected());
        assert!(matches!(
            sink.send(heartbeat()),
            Err(AgentError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn install_routes_sends_to_the_new_channel() {
        let sink = ChannelSink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.install(tx);
        assert!(sink.is_connected());

        sink.send(heartbeat()).unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(AgentMessage::Heartbeat { .. })
        ));

        sink.clear();
        assert!(matches!(
            sink.send(heartbeat()),
            Err(AgentError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn a_replaced_channel_takes_over_from_the_old_one() {
        let sink = ChannelSink::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        sink.install(tx1);
        sink.install(tx2);
        sink.send(heartbeat()).unwrap();

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        drop(rx2);
    }
}
