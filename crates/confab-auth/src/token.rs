//! Token signing and verification
//!
//! One [`AuthService`] per broker owns the HMAC secret. The secret comes
//! from `JWT_PRIVATE_KEY`; when unset a random process-lifetime secret is
//! generated, which invalidates outstanding tokens across restarts.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::{AuthError, Result};

/// Length of broker-generated identifiers
pub const SECURE_ID_LEN: usize = 24;

/// Lifetime of a user identity token
pub const USER_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lifetime of a room claim token
pub const ROOM_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Environment variable holding the HMAC secret
const SECRET_ENV: &str = "JWT_PRIVATE_KEY";

/// Generate a 24-character identifier from a cryptographically secure RNG
pub fn secure_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECURE_ID_LEN)
        .map(char::from)
        .collect()
}

/// A registered user identity
///
/// `id` is broker-assigned at first login and unique for the broker
/// lifetime. Identities are not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Broker-assigned identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Optional email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Payload authorising a connection to one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomClaim {
    /// Room the bearer may connect to
    pub room: String,
    /// Identity snapshot taken when the claim was signed
    pub user: User,
    /// Whether the bearer connects as the room host
    pub host: bool,
}

/// Signed payload plus the registered expiry claim
#[derive(Serialize, Deserialize)]
struct Claims<T> {
    #[serde(flatten)]
    payload: T,
    exp: u64,
}

/// Signs and verifies broker tokens
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AuthService {
    /// Create a service signing with the given secret
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Create a service with the secret from `JWT_PRIVATE_KEY`
    ///
    /// Falls back to a random process-lifetime secret when the variable is
    /// unset or empty.
    pub fn from_env() -> Self {
        match std::env::var(SECRET_ENV) {
            Ok(secret) if !secret.is_empty() => Self::new(secret.as_bytes()),
            _ => {
                warn!(
                    "{} not set, using a random secret; tokens will not survive a restart",
                    SECRET_ENV
                );
                let secret: [u8; 32] = rand::thread_rng().gen();
                Self::new(&secret)
            }
        }
    }

    /// Sign a payload as an HS256 JWT expiring after `ttl`
    pub fn generate_jwt<T: Serialize>(&self, payload: &T, ttl: Duration) -> Result<String> {
        let claims =
            Claims { payload, exp: jsonwebtoken::get_current_timestamp() + ttl.as_secs() };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::Invalid)
    }

    /// Verify a token and extract its payload
    pub fn verify_jwt<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let data = decode::<Claims<T>>(token, &self.decoding, &Validation::default())
            .map_err(|_| AuthError::Invalid)?;
        Ok(data.claims.payload)
    }

    /// Decode a user identity token
    ///
    /// Fails with [`AuthError::Invalid`] when the token does not carry a
    /// usable identity.
    pub fn get_user(&self, token: &str) -> Result<User> {
        let user: User = self.verify_jwt(token)?;
        if user.id.is_empty() || user.name.is_empty() {
            return Err(AuthError::Invalid);
        }
        Ok(user)
    }

    /// Register a new user identity and sign its token
    pub fn register_user(&self, name: String, email: Option<String>) -> Result<(User, String)> {
        let user = User { id: secure_id(), name, email };
        let token = self.generate_jwt(&user, USER_TOKEN_TTL)?;
        Ok((user, token))
    }

    /// Sign a room claim
    pub fn sign_room_claim(&self, claim: &RoomClaim) -> Result<String> {
        self.generate_jwt(claim, ROOM_TOKEN_TTL)
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(b"test-secret")
    }

    #[test]
    fn test_secure_id_shape() {
        let id = secure_id();
        assert_eq!(id.len(), SECURE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, secure_id());
    }

    #[test]
    fn test_jwt_roundtrip() {
        let auth = service();
        let claim = RoomClaim {
            room: "r1".into(),
            user: User { id: "u1".into(), name: "Alice".into(), email: None },
            host: true,
        };
        let token = auth.sign_room_claim(&claim).unwrap();
        let decoded: RoomClaim = auth.verify_jwt(&token).unwrap();
        assert_eq!(decoded, claim);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let auth = service();
        let (_, token) = auth.register_user("Alice".into(), None).unwrap();

        // Flip one byte anywhere in the token.
        let mut bytes = token.into_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_eq!(auth.verify_jwt::<User>(&tampered).unwrap_err(), AuthError::Invalid);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (_, token) = service().register_user("Alice".into(), None).unwrap();
        let other = AuthService::new(b"other-secret");
        assert_eq!(other.get_user(&token).unwrap_err(), AuthError::Invalid);
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = service();
        let user = User { id: "u1".into(), name: "Alice".into(), email: None };
        // Sign a claim that expired well past the default leeway.
        let claims =
            Claims { payload: &user, exp: jsonwebtoken::get_current_timestamp() - 3600 };
        let token = encode(&Header::default(), &claims, &auth.encoding).unwrap();

        assert_eq!(auth.verify_jwt::<User>(&token).unwrap_err(), AuthError::Invalid);
    }

    #[test]
    fn test_get_user_requires_identity_fields() {
        let auth = service();
        let token = auth
            .generate_jwt(
                &serde_json::json!({"id": "", "name": "Alice"}),
                Duration::from_secs(60),
            )
            .unwrap();
        assert_eq!(auth.get_user(&token).unwrap_err(), AuthError::Invalid);

        let token = auth
            .generate_jwt(&serde_json::json!({"name": "Alice"}), Duration::from_secs(60))
            .unwrap();
        assert_eq!(auth.get_user(&token).unwrap_err(), AuthError::Invalid);
    }

    #[test]
    fn test_register_user_assigns_fresh_ids() {
        let auth = service();
        let (alice, token) = auth.register_user("Alice".into(), None).unwrap();
        let (bob, _) = auth.register_user("Bob".into(), Some("bob@example.com".into())).unwrap();
        assert_ne!(alice.id, bob.id);
        assert_eq!(auth.get_user(&token).unwrap(), alice);
    }
}
