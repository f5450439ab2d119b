//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound message could not be decoded
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Outbound message could not be encoded
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}
