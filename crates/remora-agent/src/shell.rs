//! Concurrent shell command sessions
//!
//! Each `shell_exec` request becomes one session: a spawned interpreter
//! process plus a worker task that streams its output lines to the
//! control channel and reports the exit status. Sessions are fully
//! independent and unbounded; the live set exists for observability, not
//! admission control.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use remora_proto::AgentMessage;

use crate::channel::ChannelSink;
use crate::identity::Identity;

/// Exit status reported when the interpreter cannot be spawned at all.
const SPAWN_FAILURE_EXIT: i32 = 1;

/// Command interpreter used to run session command text.
#[derive(Debug, Clone)]
struct Interpreter {
    program: String,
    flag: String,
}

impl Default for Interpreter {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                program: "cmd".to_string(),
                flag: "/C".to_string(),
            }
        } else {
            Self {
                program: "/bin/sh".to_string(),
                flag: "-c".to_string(),
            }
        }
    }
}

/// Book-keeping for one live session.
#[derive(Debug)]
struct SessionInfo {
    started_at: Instant,
}

/// Owner of all running shell sessions.
///
/// Cloning shares the live set; any clone may start sessions. Sessions
/// outlive control-channel reconnects: a session started before a
/// disconnect keeps running, and its later output goes to whichever
/// channel is active when each line is produced.
#[derive(Clone)]
pub struct ShellSessions {
    identity: Arc<Identity>,
    sink: ChannelSink,
    live: Arc<Mutex<HashMap<String, SessionInfo>>>,
    interpreter: Interpreter,
}

impl ShellSessions {
    /// Create a session manager using the platform interpreter.
    pub fn new(identity: Arc<Identity>, sink: ChannelSink) -> Self {
        Self {
            identity,
            sink,
            live: Arc::new(Mutex::new(HashMap::new())),
            interpreter: Interpreter::default(),
        }
    }

    #[cfg(test)]
    fn with_interpreter(identity: Arc<Identity>, sink: ChannelSink, program: &str) -> Self {
        let mut sessions = Self::new(identity, sink);
        sessions.interpreter = Interpreter {
            program: program.to_string(),
            flag: "-c".to_string(),
        };
        sessions
    }

    /// Begin executing `command` under `session_id`. Returns immediately;
    /// all output and the exit status are delivered through the sink.
    pub fn start(&self, session_id: String, command: String) {
        info!(session_id = %session_id, command = %command, "starting shell session");
        self.live.lock().expect("session map poisoned").insert(
            session_id.clone(),
            SessionInfo {
                started_at: Instant::now(),
            },
        );

        let sessions = self.clone();
        tokio::spawn(async move {
            sessions.run_session(session_id, command).await;
        });
    }

    /// Number of sessions currently running.
    pub fn live_count(&self) -> usize {
        self.live.lock().expect("session map poisoned").len()
    }

    /// Whether `session_id` maps to a live process.
    pub fn is_live(&self, session_id: &str) -> bool {
        self.live
            .lock()
            .expect("session map poisoned")
            .contains_key(session_id)
    }

    async fn run_session(&self, session_id: String, command: String) {
        let mut child = match Command::new(&self.interpreter.program)
            .arg(&self.interpreter.flag)
            .arg(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to spawn interpreter");
                self.send_output(&session_id, format!("Error: {e}\n"));
                self.remove(&session_id);
                self.send_exit(&session_id, SPAWN_FAILURE_EXIT);
                return;
            }
        };

        // One queue per session: both pipe readers feed it, and draining
        // it to completion before wait() guarantees every output message
        // precedes the exit message.
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        while let Some(line) = line_rx.recv().await {
            self.send_output(&session_id, line);
        }

        let exit_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to reap session process");
                -1
            }
        };

        let elapsed = {
            let live = self.live.lock().expect("session map poisoned");
            live.get(&session_id).map(|info| info.started_at.elapsed())
        };
        debug!(session_id = %session_id, exit_code, ?elapsed, "shell session finished");

        // Leave the live set before the exit message goes out, so an
        // observer that has seen the exit never also sees the session.
        self.remove(&session_id);
        self.send_exit(&session_id, exit_code);
    }

    fn send_output(&self, session_id: &str, output: String) {
        let message = AgentMessage::ShellOutput {
            agent_id: self.identity.agent_id(),
            session_id: session_id.to_string(),
            output,
        };
        if self.sink.send(message).is_err() {
            debug!(session_id = %session_id, "channel down, shell output dropped");
        }
    }

    fn send_exit(&self, session_id: &str, exit_code: i32) {
        let message = AgentMessage::ShellExit {
            agent_id: self.identity.agent_id(),
            session_id: session_id.to_string(),
            exit_code,
        };
        if self.sink.send(message).is_err() {
            debug!(session_id = %session_id, "channel down, shell exit dropped");
        }
    }

    fn remove(&self, session_id: &str) {
        self.live
            .lock()
            .expect("session map poisoned")
            .remove(session_id);
    }
}

/// Forward each line of one pipe into the session queue, newline
/// restored to match the wire framing.
async fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(format!("{line}\n")).is_err() {
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use clap::Parser;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{timeout, Duration};

    fn fixture() -> (ShellSessions, UnboundedReceiver<AgentMessage>) {
        let config = AgentConfig::parse_from(["remora-agent"]);
        let identity = Arc::new(Identity::from_config(&config));
        let sink = ChannelSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sink.install(tx);
        (ShellSessions::new(identity, sink), rx)
    }

    /// Drain messages for one session until its exit message arrives.
    async fn collect_session(
        rx: &mut UnboundedReceiver<AgentMessage>,
        session_id: &str,
    ) -> (Vec<String>, i32) {
        let mut outputs = Vec::new();
        loop {
            let message = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("session timed out")
                .expect("sink closed");
            match message {
                AgentMessage::ShellOutput {
                    session_id: sid,
                    output,
                    ..
                } if sid == session_id => outputs.push(output),
                AgentMessage::ShellExit {
                    session_id: sid,
                    exit_code,
                    ..
                } if sid == session_id => return (outputs, exit_code),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn echo_yields_one_output_line_then_exit_zero() {
        let (sessions, mut rx) = fixture();
        sessions.start("s1".to_string(), "echo hi".to_string());

        let (outputs, exit_code) = collect_session(&mut rx, "s1").await;
        assert_eq!(outputs, vec!["hi\n".to_string()]);
        assert_eq!(exit_code, 0);
        assert!(!sessions.is_live("s1"));
    }

    #[tokio::test]
    async fn output_lines_keep_production_order() {
        let (sessions, mut rx) = fixture();
        sessions.start("s1".to_string(), "printf 'a\\nb\\nc\\n'".to_string());

        let (outputs, exit_code) = collect_session(&mut rx, "s1").await;
        assert_eq!(outputs, vec!["a\n", "b\n", "c\n"]);
        assert_eq!(exit_code, 0);
    }

    #[tokio::test]
    async fn concurrent_sessions_interleave_but_never_reorder() {
        let (sessions, mut rx) = fixture();
        sessions.start("fast".to_string(), "printf '1\\n2\\n'".to_string());
        sessions.start(
            "slow".to_string(),
            "printf 'x\\n'; sleep 0.2; printf 'y\\n'".to_string(),
        );

        let mut per_session: HashMap<String, Vec<AgentMessage>> = HashMap::new();
        let mut exits = 0;
        while exits < 2 {
            let message = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("sessions timed out")
                .expect("sink closed");
            match &message {
                AgentMessage::ShellOutput { session_id, .. } => {
                    per_session.entry(session_id.clone()).or_default().push(message);
                }
                AgentMessage::ShellExit { session_id, .. } => {
                    exits += 1;
                    per_session.entry(session_id.clone()).or_default().push(message);
                }
                _ => {}
            }
        }

        let fast: Vec<_> = per_session["fast"]
            .iter()
            .filter_map(|m| match m {
                AgentMessage::ShellOutput { output, .. } => Some(output.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fast, vec!["1\n", "2\n"]);

        let slow: Vec<_> = per_session["slow"]
            .iter()
            .filter_map(|m| match m {
                AgentMessage::ShellOutput { output, .. } => Some(output.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(slow, vec!["x\n", "y\n"]);

        // The exit message is last for each session.
        for messages in per_session.values() {
            assert!(matches!(
                messages.last().unwrap(),
                AgentMessage::ShellExit { .. }
            ));
        }
        assert_eq!(sessions.live_count(), 0);
    }

    #[tokio::test]
    async fn stderr_is_part_of_the_session_output() {
        let (sessions, mut rx) = fixture();
        sessions.start("s1".to_string(), "echo oops >&2; exit 3".to_string());

        let (outputs, exit_code) = collect_session(&mut rx, "s1").await;
        assert_eq!(outputs, vec!["oops\n".to_string()]);
        assert_eq!(exit_code, 3);
    }

    #[tokio::test]
    async fn nonzero_exit_status_is_reported_verbatim() {
        let (sessions, mut rx) = fixture();
        sessions.start("s1".to_string(), "exit 7".to_string());

        let (outputs, exit_code) = collect_session(&mut rx, "s1").await;
        assert!(outputs.is_empty());
        assert_eq!(exit_code, 7);
    }

    #[tokio::test]
    async fn spawn_failure_reports_error_text_and_sentinel_exit() {
        let config = AgentConfig::parse_from(["remora-agent"]);
        let identity = Arc::new(Identity::from_config(&config));
        let sink = ChannelSink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.install(tx);
        let sessions =
            ShellSessions::with_interpreter(identity, sink, "/nonexistent/interpreter");

        sessions.start("s1".to_string(), "echo hi".to_string());
        let (outputs, exit_code) = collect_session(&mut rx, "s1").await;
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].starts_with("Error: "));
        assert_eq!(exit_code, SPAWN_FAILURE_EXIT);
        assert_eq!(sessions.live_count(), 0);
    }

    #[tokio::test]
    async fn sessions_survive_a_disconnected_channel() {
        // A disconnect does not kill in-flight sessions; their output is
        // simply rejected at the sink until a channel comes back.
        let config = AgentConfig::parse_from(["remora-agent"]);
        let identity = Arc::new(Identity::from_config(&config));
        let sink = ChannelSink::new();
        let sessions = ShellSessions::new(identity, sink);

        sessions.start("s1".to_string(), "echo hi".to_string());
        timeout(Duration::from_secs(5), async {
            while sessions.live_count() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session never completed");
    }
}
