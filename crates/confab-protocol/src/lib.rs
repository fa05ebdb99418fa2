//! Confab wire protocol
//!
//! Defines the envelope types carried between peers and the broker, the
//! JSON codec with version checking, the stable method namespace, and the
//! transport-agnostic duplex channel the broker speaks over.

#![forbid(unsafe_code)]

pub mod channel;
pub mod envelope;
pub mod error;
pub mod methods;

pub use channel::Channel;
pub use envelope::{Envelope, MessageId, PROTOCOL_VERSION};
pub use error::ProtocolError;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
