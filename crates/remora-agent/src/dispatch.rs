//! Inbound message routing
//!
//! One decoded message in, exactly one action out. The dispatcher owns
//! no session state itself; it hands work to the shell session manager,
//! the VNC controller, or the update/input collaborators, and queues any
//! reply through the channel sink. Unrecognised message kinds are
//! ignored so a newer server can speak to an older agent.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use remora_proto::{AgentMessage, ServerMessage};

use crate::capture::InputSink;
use crate::channel::ChannelSink;
use crate::identity::Identity;
use crate::shell::ShellSessions;
use crate::updates::UpdateManager;
use crate::vnc::VncController;

/// Routes each inbound message to its owning component.
#[derive(Clone)]
pub struct Dispatcher {
    identity: Arc<Identity>,
    sink: ChannelSink,
    sessions: ShellSessions,
    vnc: VncController,
    updates: Arc<dyn UpdateManager>,
    input: Arc<dyn InputSink>,
}

impl Dispatcher {
    /// Wire a dispatcher to its components.
    pub fn new(
        identity: Arc<Identity>,
        sink: ChannelSink,
        sessions: ShellSessions,
        vnc: VncController,
        updates: Arc<dyn UpdateManager>,
        input: Arc<dyn InputSink>,
    ) -> Self {
        Self {
            identity,
            sink,
            sessions,
            vnc,
            updates,
            input,
        }
    }

    /// Perform the action for one decoded inbound message.
    pub async fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::AuthSuccess { agent_id } => {
                info!(agent_id = %agent_id, "authentication successful");
                self.identity.set_agent_id(agent_id);
            }

            ServerMessage::ShellExec { command, session_id } => {
                let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                self.sessions.start(session_id, command);
            }

            ServerMessage::CheckUpdates => self.spawn_update_check(),

            ServerMessage::InstallUpdates { update_ids } => self.spawn_update_install(update_ids),

            ServerMessage::VncStart { quality, fps } => self.vnc.start(quality, fps).await,

            ServerMessage::VncStop => self.vnc.stop().await,

            ServerMessage::VncInput { input } => {
                if let Err(e) = self.input.inject(input).await {
                    warn!(error = %e, "input injection failed");
                }
            }

            ServerMessage::Unknown => {
                debug!("ignoring unrecognised message type");
            }
        }
    }

    /// Update enumeration shells out to the package manager, so it runs
    /// on its own task and reports back through the sink.
    fn spawn_update_check(&self) {
        let updates = Arc::clone(&self.updates);
        let sink = self.sink.clone();
        let identity = Arc::clone(&self.identity);
        tokio::spawn(async move {
            match updates.list_available().await {
                Ok(list) => {
                    info!(count = list.len(), "update check finished");
                    let message = AgentMessage::UpdatesList {
                        agent_id: identity.agent_id(),
                        os: identity.os.clone(),
                        updates: list,
                    };
                    if sink.send(message).is_err() {
                        warn!("channel down, updates list dropped");
                    }
                }
                Err(e) => error!(error = %e, "update check failed"),
            }
        });
    }

    fn spawn_update_install(&self, update_ids: Vec<String>) {
        let updates = Arc::clone(&self.updates);
        let sink = self.sink.clone();
        let identity = Arc::clone(&self.identity);
        tokio::spawn(async move {
            let (result, error) = match updates.apply(&update_ids).await {
                Ok(result) => (Some(result), None),
                Err(e) => {
                    error!(error = %e, "update installation failed");
                    (None, Some(e.to_string()))
                }
            };
            let message = AgentMessage::CommandResult {
                agent_id: identity.agent_id(),
                result,
                error,
            };
            if sink.send(message).is_err() {
                warn!("channel down, command result dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TestCardSource;
    use crate::config::AgentConfig;
    use crate::error::{AgentError, Result};
    use async_trait::async_trait;
    use clap::Parser;
    use remora_proto::{InputEvent, UpdateRecord};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{timeout, Duration};

    struct FixedUpdates {
        fail: bool,
    }

    #[async_trait]
    impl UpdateManager for FixedUpdates {
        async fn list_available(&self) -> Result<Vec<UpdateRecord>> {
            if self.fail {
                return Err(AgentError::Updates("probe failed".to_string()));
            }
            Ok(vec![UpdateRecord {
                title: "bash".to_string(),
                description: "Version 5.2 available".to_string(),
                kb: String::new(),
                size: 0.0,
                important: false,
                critical: false,
            }])
        }

        async fn apply(&self, _update_ids: &[String]) -> Result<String> {
            if self.fail {
                return Err(AgentError::Updates("upgrade failed".to_string()));
            }
            Ok("Updates installed successfully".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingInput {
        events: Mutex<Vec<InputEvent>>,
    }

    #[async_trait]
    impl InputSink for RecordingInput {
        async fn inject(&self, event: InputEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn fixture(
        updates: Arc<dyn UpdateManager>,
        input: Arc<dyn InputSink>,
    ) -> (Dispatcher, Arc<Identity>, UnboundedReceiver<AgentMessage>) {
        let config = AgentConfig::parse_from(["remora-agent"]);
        let identity = Arc::new(Identity::from_config(&config));
        let sink = ChannelSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sink.install(tx);

        let sessions = ShellSessions::new(Arc::clone(&identity), sink.clone());
        let vnc = VncController::new(
            Arc::clone(&identity),
            sink.clone(),
            Arc::new(TestCardSource::new()),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&identity),
            sink,
            sessions,
            vnc,
            updates,
            input,
        );
        (dispatcher, identity, rx)
    }

    async fn next_message(rx: &mut UnboundedReceiver<AgentMessage>) -> AgentMessage {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no message arrived")
            .expect("sink closed")
    }

    #[tokio::test]
    async fn unknown_messages_are_ignored() {
        let (dispatcher, _, mut rx) = fixture(
            Arc::new(FixedUpdates { fail: false }),
            Arc::new(RecordingInput::default()),
        );
        dispatcher.dispatch(ServerMessage::Unknown).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn auth_success_reassigns_the_agent_id() {
        let (dispatcher, identity, _rx) = fixture(
            Arc::new(FixedUpdates { fail: false }),
            Arc::new(RecordingInput::default()),
        );
        dispatcher
            .dispatch(ServerMessage::AuthSuccess {
                agent_id: "reassigned".to_string(),
            })
            .await;
        assert_eq!(identity.agent_id(), "reassigned");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_exec_without_session_id_generates_one() {
        let (dispatcher, _, mut rx) = fixture(
            Arc::new(FixedUpdates { fail: false }),
            Arc::new(RecordingInput::default()),
        );
        dispatcher
            .dispatch(ServerMessage::ShellExec {
                command: "echo hi".to_string(),
                session_id: None,
            })
            .await;

        match next_message(&mut rx).await {
            AgentMessage::ShellOutput { session_id, .. } => {
                Uuid::parse_str(&session_id).expect("generated id is a uuid");
            }
            other => panic!("expected shell output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_updates_reports_the_listing() {
        let (dispatcher, _, mut rx) = fixture(
            Arc::new(FixedUpdates { fail: false }),
            Arc::new(RecordingInput::default()),
        );
        dispatcher.dispatch(ServerMessage::CheckUpdates).await;

        match next_message(&mut rx).await {
            AgentMessage::UpdatesList { updates, os, .. } => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].title, "bash");
                assert_eq!(os, std::env::consts::OS);
            }
            other => panic!("expected updates list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_install_becomes_a_command_result_error() {
        let (dispatcher, _, mut rx) = fixture(
            Arc::new(FixedUpdates { fail: true }),
            Arc::new(RecordingInput::default()),
        );
        dispatcher
            .dispatch(ServerMessage::InstallUpdates {
                update_ids: vec!["u1".to_string()],
            })
            .await;

        match next_message(&mut rx).await {
            AgentMessage::CommandResult { result, error, .. } => {
                assert!(result.is_none());
                assert!(error.unwrap().contains("upgrade failed"));
            }
            other => panic!("expected command result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn vnc_input_reaches_the_injector() {
        let input = Arc::new(RecordingInput::default());
        let (dispatcher, _, _rx) = fixture(
            Arc::new(FixedUpdates { fail: false }),
            Arc::clone(&input) as Arc<dyn InputSink>,
        );
        dispatcher
            .dispatch(ServerMessage::VncInput {
                input: InputEvent::MouseMove { x: 3, y: 4 },
            })
            .await;
        assert_eq!(
            *input.events.lock().unwrap(),
            vec![InputEvent::MouseMove { x: 3, y: 4 }]
        );
    }
}
