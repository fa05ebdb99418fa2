//! Confab credentials
//!
//! Signed, verifiable tokens carrying user identity and room claims, plus
//! the deferred-confirmation registry backing out-of-band login. All tokens
//! are HMAC-SHA256 JWTs signed with one broker-wide secret.

#![forbid(unsafe_code)]

pub mod error;
pub mod login;
pub mod token;

pub use error::AuthError;
pub use login::{ConfirmedLogin, LoginRegistry, CONFIRM_TIMEOUT};
pub use token::{secure_id, AuthService, RoomClaim, User, SECURE_ID_LEN};

/// Result type for credential operations
pub type Result<T> = std::result::Result<T, AuthError>;
