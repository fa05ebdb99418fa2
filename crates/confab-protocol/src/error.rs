//! Protocol error types

use thiserror::Error;

/// Protocol-layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Envelope failed to parse or is missing required fields
    #[error("invalid envelope: {0}")]
    SchemaInvalid(String),

    /// Envelope carried a protocol version other than ours
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this broker speaks
        expected: String,
        /// Version found on the envelope
        actual: String,
    },

    /// The channel was closed by either side
    #[error("channel closed")]
    ChannelClosed,
}
