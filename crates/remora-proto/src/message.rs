//! Inbound and outbound message enums and the JSON codec

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{InputEvent, SystemInfo, UpdateRecord, VncQuality};

/// Messages the server sends to the agent.
///
/// Unknown `type` tags decode to [`ServerMessage::Unknown`] so a newer
/// server can introduce message kinds without breaking older agents; the
/// dispatcher drops them with a diagnostic. A known tag with malformed
/// fields is a decode error and the whole message is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication accepted; may reassign the agent id
    #[serde(rename_all = "camelCase")]
    AuthSuccess {
        /// Server-assigned agent identifier
        agent_id: String,
    },

    /// Run a shell command and stream its output back
    #[serde(rename_all = "camelCase")]
    ShellExec {
        /// Command text for the platform interpreter
        command: String,
        /// Session identifier; generated when the server omits it
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Enumerate available package updates
    CheckUpdates,

    /// Install updates previously listed
    #[serde(rename_all = "camelCase")]
    InstallUpdates {
        /// Ids of the updates to install
        #[serde(default)]
        update_ids: Vec<String>,
    },

    /// Begin streaming screen frames
    VncStart {
        /// Requested quality tier
        #[serde(default)]
        quality: VncQuality,
        /// Target frames per second
        #[serde(default = "default_fps")]
        fps: u32,
    },

    /// Stop streaming screen frames
    VncStop,

    /// Inject one remote input event
    VncInput {
        /// The event to apply
        input: InputEvent,
    },

    /// Any message kind this agent does not recognise
    #[serde(other)]
    Unknown,
}

fn default_fps() -> u32 {
    15
}

impl ServerMessage {
    /// Decode one inbound control-channel message from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Messages the agent sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// First message on every connection: identity, credential, telemetry
    #[serde(rename_all = "camelCase")]
    Auth {
        /// Shared secret supplied at startup
        token: String,
        /// Agent identifier
        agent_id: String,
        /// Host name
        hostname: String,
        /// OS family
        os: String,
        /// OS version string
        version: String,
        /// Customer label
        customer: String,
        /// Site label
        site: String,
        /// Telemetry snapshot taken at connect time
        system_info: SystemInfo,
    },

    /// Periodic liveness report while connected
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        /// Agent identifier
        agent_id: String,
        /// Fresh telemetry snapshot
        system_info: SystemInfo,
    },

    /// One line of shell output for a session
    #[serde(rename_all = "camelCase")]
    ShellOutput {
        /// Agent identifier
        agent_id: String,
        /// Session the line belongs to
        session_id: String,
        /// The produced line, trailing newline included
        output: String,
    },

    /// Terminal status of a shell session
    #[serde(rename_all = "camelCase")]
    ShellExit {
        /// Agent identifier
        agent_id: String,
        /// Session that ended
        session_id: String,
        /// Process exit status
        exit_code: i32,
    },

    /// Result of an update enumeration
    #[serde(rename_all = "camelCase")]
    UpdatesList {
        /// Agent identifier
        agent_id: String,
        /// OS family the records apply to
        os: String,
        /// Available updates, capped by the collector
        updates: Vec<UpdateRecord>,
    },

    /// Outcome of a server-requested operation without its own reply kind
    #[serde(rename_all = "camelCase")]
    CommandResult {
        /// Agent identifier
        agent_id: String,
        /// Success text, when the operation succeeded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        /// Error text, when it failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One encoded screen frame
    #[serde(rename_all = "camelCase")]
    VncFrame {
        /// Agent identifier
        agent_id: String,
        /// Base64-encoded JPEG frame
        frame: String,
        /// Capture time, seconds since the Unix epoch
        timestamp: f64,
    },
}

impl AgentMessage {
    /// Encode one outbound control-channel message as JSON text.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}
