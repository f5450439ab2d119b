//! # Remora Agent
//!
//! A long-lived remote-management agent. It keeps one outbound WebSocket
//! control channel to the central server, executes server-issued shell
//! commands with streamed output, shares the screen as a frame stream, and
//! relays a secondary TCP connection for screen-sharing clients behind
//! NAT.

#![warn(missing_docs)]

/// Immutable process configuration
pub mod config;

/// Agent identity shared across components
pub mod identity;

/// Outbound control-channel sink
pub mod channel;

/// Control-channel supervision: connect, authenticate, heartbeat, receive
pub mod connection;

/// Inbound message routing
pub mod dispatch;

/// Concurrent shell command sessions
pub mod shell;

/// Screen-frame streaming controller
pub mod vnc;

/// Raw TCP tunnel relay
pub mod tunnel;

/// Host telemetry collection
pub mod telemetry;

/// Package update discovery and installation
pub mod updates;

/// Frame capture and input injection seams
pub mod capture;

/// Error types for agent operations
pub mod error;

pub use channel::ChannelSink;
pub use config::AgentConfig;
pub use connection::{Connection, Timing};
pub use dispatch::Dispatcher;
pub use error::{AgentError, Result};
pub use identity::Identity;
pub use shell::ShellSessions;
pub use tunnel::{RelayEnd, TunnelRelay};
pub use vnc::VncController;
