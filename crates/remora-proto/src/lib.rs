//! # Remora Protocol
//!
//! Message types and JSON codec for the Remora control channel.
//!
//! The control channel carries JSON objects tagged by a `type` string in
//! both directions. Inbound (server to agent) messages decode into
//! [`ServerMessage`]; outbound (agent to server) messages encode from
//! [`AgentMessage`]. Field names on the wire are normative and preserved
//! exactly by serde renames.

#![warn(missing_docs)]

/// Inbound and outbound message enums and the JSON codec
pub mod message;

/// Payload types shared by several messages
pub mod types;

/// Error types for protocol operations
pub mod error;

pub use error::ProtocolError;
pub use message::{AgentMessage, ServerMessage};
pub use types::{InputEvent, SystemInfo, TelemetryReport, UpdateRecord, VncQuality};
