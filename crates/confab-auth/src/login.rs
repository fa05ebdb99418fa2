//! Deferred login confirmation
//!
//! Out-of-band login hands the client an opaque confirm token, then parks
//! the client's confirmation request until the login page (or a dev-mode
//! call) supplies the identity for that token. Entries that are not
//! resolved within [`CONFIRM_TIMEOUT`] are evicted and the waiting request
//! fails with a timeout.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::{token::AuthService, AuthError, Result, User};

/// How long an unconfirmed login entry is kept
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of a confirmed login
#[derive(Debug, Clone)]
pub struct ConfirmedLogin {
    /// The freshly registered identity
    pub user: User,
    /// Signed user token for subsequent API calls
    pub token: String,
}

/// In-memory registry of logins awaiting confirmation
#[derive(Debug, Default)]
pub struct LoginRegistry {
    pending: DashMap<String, oneshot::Sender<ConfirmedLogin>>,
}

impl LoginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the login under `confirm_token` to be confirmed
    ///
    /// Registers a pending entry and parks until [`confirm_user`] resolves
    /// it. Fails with [`AuthError::Timeout`] after [`CONFIRM_TIMEOUT`], or
    /// when a second wait replaces this entry.
    ///
    /// [`confirm_user`]: Self::confirm_user
    pub async fn confirm_auth(&self, confirm_token: &str) -> Result<ConfirmedLogin> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(confirm_token.to_string(), tx);

        match tokio::time::timeout(CONFIRM_TIMEOUT, rx).await {
            Ok(Ok(login)) => Ok(login),
            Ok(Err(_)) => Err(AuthError::Timeout),
            Err(_) => {
                self.pending.remove(confirm_token);
                Err(AuthError::Timeout)
            }
        }
    }

    /// Confirm a pending login with the supplied identity
    ///
    /// Registers `name`/`email` as a new [`User`], signs its token, and
    /// resolves the waiting [`confirm_auth`] call. Fails with
    /// [`AuthError::Timeout`] when no entry matches `confirm_token`.
    ///
    /// [`confirm_auth`]: Self::confirm_auth
    pub fn confirm_user(
        &self,
        auth: &AuthService,
        confirm_token: &str,
        name: String,
        email: Option<String>,
    ) -> Result<String> {
        let (_, waiter) = self.pending.remove(confirm_token).ok_or(AuthError::Timeout)?;
        let (user, token) = auth.register_user(name, email)?;
        let _ = waiter.send(ConfirmedLogin { user, token: token.clone() });
        Ok(token)
    }

    /// Number of logins awaiting confirmation
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthService {
        AuthService::new(b"test-secret")
    }

    #[tokio::test]
    async fn test_confirm_resolves_waiter() {
        let registry = std::sync::Arc::new(LoginRegistry::new());
        let auth = auth();

        let waiter = {
            let registry = std::sync::Arc::clone(&registry);
            tokio::spawn(async move { registry.confirm_auth("t1").await })
        };
        // Let the waiter register its entry before confirming.
        tokio::task::yield_now().await;

        let token = registry.confirm_user(&auth, "t1", "Alice".into(), None).unwrap();
        let login = waiter.await.unwrap().unwrap();
        assert_eq!(login.token, token);
        assert_eq!(login.user.name, "Alice");
        assert_eq!(auth.get_user(&login.token).unwrap(), login.user);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_confirm_unknown_token_fails() {
        let registry = LoginRegistry::new();
        let err = registry.confirm_user(&auth(), "nope", "Alice".into(), None).unwrap_err();
        assert_eq!(err, AuthError::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_login_times_out() {
        let registry = LoginRegistry::new();
        let err = registry.confirm_auth("t1").await.unwrap_err();
        assert_eq!(err, AuthError::Timeout);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_after_timeout_fails() {
        let registry = LoginRegistry::new();
        registry.confirm_auth("t1").await.unwrap_err();
        let err = registry.confirm_user(&auth(), "t1", "Alice".into(), None).unwrap_err();
        assert_eq!(err, AuthError::Timeout);
    }
}
