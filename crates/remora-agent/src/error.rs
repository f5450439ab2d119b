//! Error types for agent operations

use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Control-channel connect or handshake failure
    #[error("connection error: {0}")]
    Connection(String),

    /// A send was attempted while no control channel is active
    #[error("control channel is not connected")]
    ChannelClosed,

    /// WebSocket transport errors
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Wire protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] remora_proto::ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Screen capture failures
    #[error("capture error: {0}")]
    Capture(String),

    /// Telemetry collection failures
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Frame decode/resize/encode failures
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Package update discovery or installation failures
    #[error("update error: {0}")]
    Updates(String),

    /// A spawned worker panicked or was cancelled
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
