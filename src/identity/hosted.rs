//! Client for the hosted identity provider (`/auth/v1` endpoints).
//!
//! Sessions are persisted in memory keyed by [`SessionKey`] and refreshed on
//! demand when the access token is about to expire, mirroring what the browser
//! SDK did with `persistSession` and `autoRefreshToken`.

use super::{
    now_unix_seconds, AuthEvent, AuthEventKind, Identity, IdentityError, IdentityProvider,
    Session, SessionKey, SignUpOutcome, SignUpRequest,
};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{collections::HashMap, time::Duration};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

const EVENT_CAPACITY: usize = 256;
const REFRESH_MARGIN_SECONDS: i64 = 30;
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;
const REQUEST_TIMEOUT_SECONDS: u64 = 10;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Identity,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.unwrap_or_else(|| {
            now_unix_seconds() + self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS)
        });
        Session {
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at,
            user: self.user,
        }
    }
}

pub struct HostedIdentity {
    client: Client,
    auth_url: Url,
    anon_key: SecretString,
    email_redirect_to: String,
    sessions: RwLock<HashMap<SessionKey, Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl HostedIdentity {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the URL is invalid.
    pub fn new(
        backend_url: &Url,
        anon_key: SecretString,
        email_redirect_to: String,
    ) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client,
            auth_url: with_trailing_slash(backend_url).join("auth/v1/")?,
            anon_key,
            email_redirect_to,
            sessions: RwLock::new(HashMap::new()),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IdentityError> {
        Ok(self.auth_url.join(path)?)
    }

    #[instrument(skip(self, body))]
    async fn token_grant(&self, grant_type: &str, body: &Value) -> Result<Session, IdentityError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .client
            .post(url)
            .header("apikey", self.anon_key.expose_secret())
            .json(body)
            .send()
            .await?;

        let token: TokenResponse = read_json(response).await?;
        Ok(token.into_session())
    }

    async fn store(&self, kind: AuthEventKind, key: SessionKey, session: Session) {
        self.sessions
            .write()
            .await
            .insert(key.clone(), session.clone());
        self.emit(kind, key, Some(session));
    }

    async fn forget(&self, key: &SessionKey) -> Option<Session> {
        let removed = self.sessions.write().await.remove(key);
        if removed.is_some() {
            self.emit(AuthEventKind::SignedOut, key.clone(), None);
        }
        removed
    }

    fn emit(&self, kind: AuthEventKind, key: SessionKey, session: Option<Session>) {
        // No subscribers is fine: nothing is listening before the auth service starts.
        let _ = self.events.send(AuthEvent { kind, key, session });
    }

    async fn refresh(&self, key: &SessionKey, current: &Session) -> Result<Option<Session>, IdentityError> {
        let body = json!({ "refresh_token": current.refresh_token.expose_secret() });
        match self.token_grant("refresh_token", &body).await {
            Ok(session) => {
                debug!(?key, "session refreshed");
                self.store(AuthEventKind::TokenRefreshed, key.clone(), session.clone())
                    .await;
                Ok(Some(session))
            }
            Err(IdentityError::Rejected(reason)) => {
                info!(?key, "refresh rejected, signing out: {reason}");
                self.forget(key).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl IdentityProvider for HostedIdentity {
    async fn session(&self, key: &SessionKey) -> Result<Option<Session>, IdentityError> {
        let current = self.sessions.read().await.get(key).cloned();
        match current {
            None => Ok(None),
            Some(session) if !session.expires_within(REFRESH_MARGIN_SECONDS) => Ok(Some(session)),
            Some(session) => self.refresh(key, &session).await,
        }
    }

    #[instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<(SessionKey, Session), IdentityError> {
        let body = json!({ "email": email, "password": password.expose_secret() });
        let session = self.token_grant("password", &body).await?;
        let key = SessionKey::generate()?;
        self.store(AuthEventKind::SignedIn, key.clone(), session.clone())
            .await;
        Ok((key, session))
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, IdentityError> {
        let mut url = self.endpoint("signup")?;
        url.query_pairs_mut()
            .append_pair("redirect_to", &self.email_redirect_to);

        let body = json!({
            "email": request.email,
            "password": request.password.expose_secret(),
            "data": request.metadata,
        });
        let response = self
            .client
            .post(url)
            .header("apikey", self.anon_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let value: Value = read_json(response).await?;

        if value.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(value)
                .map_err(|err| IdentityError::Response(err.to_string()))?
                .into_session();
            let key = SessionKey::generate()?;
            self.store(AuthEventKind::SignedIn, key.clone(), session.clone())
                .await;
            return Ok(SignUpOutcome::SignedIn { key, session });
        }

        // Confirmation pending: the body is the user, either bare or under `user`.
        let user_value = value.get("user").cloned().unwrap_or(value);
        let user = serde_json::from_value::<Identity>(user_value)
            .map_err(|err| IdentityError::Response(err.to_string()))?;
        Ok(SignUpOutcome::ConfirmationRequired { user })
    }

    #[instrument(skip(self, token_hash))]
    async fn verify_email(
        &self,
        token_hash: &str,
        kind: &str,
    ) -> Result<(SessionKey, Session), IdentityError> {
        let url = self.endpoint("verify")?;
        let response = self
            .client
            .post(url)
            .header("apikey", self.anon_key.expose_secret())
            .json(&json!({ "type": kind, "token_hash": token_hash }))
            .send()
            .await?;
        let session = read_json::<TokenResponse>(response).await?.into_session();
        let key = SessionKey::generate()?;
        self.store(AuthEventKind::SignedIn, key.clone(), session.clone())
            .await;
        Ok((key, session))
    }

    #[instrument(skip(self))]
    async fn sign_out(&self, key: &SessionKey) -> Result<(), IdentityError> {
        let Some(session) = self.forget(key).await else {
            return Ok(());
        };

        let url = self.endpoint("logout")?;
        let result = self
            .client
            .post(url)
            .header("apikey", self.anon_key.expose_secret())
            .header(
                AUTHORIZATION,
                format!("Bearer {}", session.access_token.expose_secret()),
            )
            .send()
            .await;

        // The local session is already gone; an unrevoked token just runs out its expiry.
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!("provider logout returned {}", response.status());
            }
            Err(err) => warn!("provider logout failed: {err}"),
            Ok(_) => {}
        }
        Ok(())
    }

    async fn evict_expired(&self, grace_seconds: i64) -> Vec<SessionKey> {
        let evicted: Vec<SessionKey> = {
            let mut sessions = self.sessions.write().await;
            let expired: Vec<SessionKey> = sessions
                .iter()
                .filter(|(_, session)| session.expired_for(grace_seconds))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                sessions.remove(key);
            }
            expired
        };

        for key in &evicted {
            self.emit(AuthEventKind::SignedOut, key.clone(), None);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted expired sessions");
        }
        evicted
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Decode a success body, or turn the provider's error body into an [`IdentityError`].
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, IdentityError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| IdentityError::Response(err.to_string()));
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
        .to_string();

    if status.is_client_error() {
        Err(IdentityError::Rejected(message))
    } else {
        Err(IdentityError::Response(format!("{status}: {message}")))
    }
}

fn error_message(body: &Value) -> Option<&str> {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
}
