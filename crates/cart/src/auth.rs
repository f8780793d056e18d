//! Authentication state consumed by the cart engine.
//!
//! Token issuance happens elsewhere; the engine only needs an opaque bearer
//! token and a signal when the user logs in or out. [`AuthStateProvider`]
//! publishes that signal over a `tokio::sync::watch` channel.

use secrecy::{ExposeSecret, SecretString};
use shopfront_core::UserId;
use tokio::sync::watch;

/// Opaque bearer token.
///
/// Implements `Debug` manually to redact the secret.
#[derive(Clone)]
pub struct AuthToken(SecretString);

impl AuthToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// The raw token, for building the `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

impl From<SecretString> for AuthToken {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Bearer token for the gateway.
    pub token: AuthToken,
    /// Authenticated user, when known.
    pub user_id: Option<UserId>,
}

impl AuthSession {
    /// Create a session from a token.
    #[must_use]
    pub const fn new(token: AuthToken, user_id: Option<UserId>) -> Self {
        Self { token, user_id }
    }
}

/// Current authentication status.
#[derive(Debug, Clone, Default)]
pub enum AuthStatus {
    /// Visitor without a session; the cart lives in guest storage.
    #[default]
    Anonymous,
    /// Logged-in user; the cart lives on the backend.
    Authenticated(AuthSession),
}

impl AuthStatus {
    /// Whether a session is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Publishes authentication transitions to interested parties.
///
/// Cheap to clone; all clones share one channel.
#[derive(Debug, Clone)]
pub struct AuthStateProvider {
    sender: watch::Sender<AuthStatus>,
}

impl AuthStateProvider {
    /// Create a provider starting in the given status.
    #[must_use]
    pub fn new(initial: AuthStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Snapshot of the current status.
    #[must_use]
    pub fn current(&self) -> AuthStatus {
        self.sender.borrow().clone()
    }

    /// Receiver that observes every subsequent transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.sender.subscribe()
    }

    /// Record a login.
    pub fn login(&self, session: AuthSession) {
        self.sender.send_replace(AuthStatus::Authenticated(session));
    }

    /// Record a logout. No-op when already anonymous.
    pub fn logout(&self) {
        self.sender.send_if_modified(|status| {
            if status.is_authenticated() {
                *status = AuthStatus::Anonymous;
                true
            } else {
                false
            }
        });
    }
}

impl Default for AuthStateProvider {
    fn default() -> Self {
        Self::new(AuthStatus::Anonymous)
    }
}
