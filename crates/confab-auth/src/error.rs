//! Credential error types

use thiserror::Error;

/// Credential errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed, badly-signed, or expired token
    #[error("invalid or expired token")]
    Invalid,

    /// Deferred login was not confirmed in time
    #[error("login was not confirmed in time")]
    Timeout,
}
