//! Broker error types and their HTTP surfaces

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::relay::RelayError;
use confab_auth::AuthError;

/// Errors surfaced by room and session operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Credential failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Join by id for a room that does not exist
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// A host claim was presented for a room that is already active
    #[error("room is already active: {0}")]
    RoomActive(String),

    /// The host declined the join request
    #[error("join request was rejected by the host")]
    JoinRejected,

    /// The host did not answer the join request in time
    #[error("host did not answer the join request in time")]
    JoinTimeout,

    /// The origin peer no longer belongs to a room
    #[error("peer does not belong to a room")]
    NoRoom,

    /// Relay failure while forwarding
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl BrokerError {
    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::Invalid) => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
