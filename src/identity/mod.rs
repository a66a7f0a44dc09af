//! Hosted identity provider seam.
//!
//! The provider owns passwords, email confirmation and token issuance; this
//! module only consumes it. Sessions are kept behind an opaque [`SessionKey`]
//! so provider tokens never leave the service, and every change to a stored
//! session is broadcast as an [`AuthEvent`] for the auth service to follow.

pub mod claims;
mod hosted;
#[cfg(test)]
pub(crate) mod testing;

pub use hosted::HostedIdentity;

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, time::SystemTime};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const SESSION_KEY_BYTES: usize = 32;
const MAX_SESSION_KEY_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum IdentityError {
    /// The provider refused the request (bad credentials, duplicate email, expired link).
    #[error("{0}")]
    Rejected(String),
    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected identity provider response: {0}")]
    Response(String),
    #[error("invalid identity provider url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to generate session key: {0}")]
    Entropy(#[from] rand::Error),
}

/// The authenticated user as reported by the identity provider.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Identity {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub app_metadata: Value,
}

/// A provider session; tokens stay wrapped so they never end up in logs.
#[derive(Clone, Debug)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: Identity,
}

impl Session {
    /// Role claim embedded in the access token, falling back to the user object
    /// metadata when the token payload cannot be decoded.
    #[must_use]
    pub fn role_claim(&self) -> Option<String> {
        match claims::token_claims(self.access_token.expose_secret()) {
            Ok(payload) => {
                claims::metadata_role(payload.get("user_metadata"), payload.get("app_metadata"))
            }
            Err(err) => {
                debug!("access token claims unreadable, using user metadata: {err}");
                claims::metadata_role(Some(&self.user.user_metadata), Some(&self.user.app_metadata))
            }
        }
    }

    #[must_use]
    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at.saturating_sub(now_unix_seconds()) <= seconds
    }

    /// True once the access token has been expired for longer than `grace_seconds`.
    #[must_use]
    pub fn expired_for(&self, grace_seconds: i64) -> bool {
        now_unix_seconds().saturating_sub(self.expires_at) > grace_seconds
    }
}

/// Opaque handle the browser holds instead of provider tokens.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Generate a fresh random key (32 bytes, base64url).
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut bytes = [0u8; SESSION_KEY_BYTES];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(Self(Base64UrlUnpadded::encode_string(&bytes)))
    }

    /// Accept a key presented by a client, rejecting anything that could not
    /// have been issued by [`SessionKey::generate`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty()
            || value.len() > MAX_SESSION_KEY_LEN
            || !value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return None;
        }
        Some(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionKey({prefix}..)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    TokenRefreshed,
    UserUpdated,
    SignedOut,
}

/// Auth-state-change notification emitted by a provider.
#[derive(Clone, Debug)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub key: SessionKey,
    pub session: Option<Session>,
}

#[derive(Debug)]
pub struct SignUpRequest {
    pub email: String,
    pub password: SecretString,
    /// Stored by the provider as `user_metadata`.
    pub metadata: Value,
}

#[derive(Debug)]
pub enum SignUpOutcome {
    /// Email confirmation is disabled; the user is signed in right away.
    SignedIn { key: SessionKey, session: Session },
    /// The provider sent a confirmation email; no session yet.
    ConfirmationRequired { user: Identity },
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session for a key, refreshing it when close to expiry.
    async fn session(&self, key: &SessionKey) -> Result<Option<Session>, IdentityError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<(SessionKey, Session), IdentityError>;

    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, IdentityError>;

    /// Exchange an email-confirmation token for a session.
    async fn verify_email(
        &self,
        token_hash: &str,
        kind: &str,
    ) -> Result<(SessionKey, Session), IdentityError>;

    async fn sign_out(&self, key: &SessionKey) -> Result<(), IdentityError>;

    /// Drop sessions whose access token expired more than `grace_seconds` ago,
    /// emitting `SignedOut` for each. Returns the evicted keys.
    async fn evict_expired(&self, grace_seconds: i64) -> Vec<SessionKey>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
