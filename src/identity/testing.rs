//! In-memory identity provider for unit tests.

use super::{
    claims::encode_test_token, now_unix_seconds, AuthEvent, AuthEventKind, Identity,
    IdentityError, IdentityProvider, Session, SessionKey, SignUpOutcome, SignUpRequest,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};
use tokio::sync::broadcast;
use uuid::Uuid;

pub(crate) struct StaticIdentity {
    sessions: Mutex<HashMap<SessionKey, Session>>,
    accounts: Mutex<HashMap<String, (String, Session)>>,
    confirmations: Mutex<HashMap<String, Session>>,
    events: broadcast::Sender<AuthEvent>,
    pub(crate) session_calls: AtomicUsize,
    pub(crate) fail_session_lookups: AtomicBool,
    pub(crate) require_confirmation: AtomicBool,
}

impl StaticIdentity {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sessions: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            confirmations: Mutex::new(HashMap::new()),
            events,
            session_calls: AtomicUsize::new(0),
            fail_session_lookups: AtomicBool::new(false),
            require_confirmation: AtomicBool::new(false),
        }
    }

    /// Build a session whose access token carries `token_role` as a claim.
    pub(crate) fn session(id: Uuid, email: &str, token_role: Option<&str>) -> Session {
        let metadata = token_role.map_or(Value::Null, |role| json!({ "role": role }));
        let token = encode_test_token(&json!({
            "sub": id.to_string(),
            "email": email,
            "user_metadata": metadata,
        }));
        Session {
            access_token: SecretString::from(token),
            refresh_token: SecretString::from("refresh".to_string()),
            expires_at: now_unix_seconds() + 3600,
            user: Identity {
                id,
                email: Some(email.to_string()),
                user_metadata: metadata,
                app_metadata: Value::Null,
            },
        }
    }

    /// Store a session without emitting an event, as if it predates startup.
    pub(crate) fn insert(&self, session: Session) -> SessionKey {
        let key = SessionKey::generate().unwrap_or_else(|_| SessionKey("fallback".to_string()));
        self.lock_sessions().insert(key.clone(), session);
        key
    }

    pub(crate) fn add_account(&self, email: &str, password: &str, session: Session) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(email.to_string(), (password.to_string(), session));
        }
    }

    pub(crate) fn add_confirmation(&self, token_hash: &str, session: Session) {
        if let Ok(mut confirmations) = self.confirmations.lock() {
            confirmations.insert(token_hash.to_string(), session);
        }
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        if let Some(session) = &event.session {
            self.lock_sessions().insert(event.key.clone(), session.clone());
        } else {
            self.lock_sessions().remove(&event.key);
        }
        let _ = self.events.send(event);
    }

    pub(crate) fn has_session(&self, key: &SessionKey) -> bool {
        self.lock_sessions().contains_key(key)
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Session>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn sign_in(&self, session: Session) -> Result<(SessionKey, Session), IdentityError> {
        let key = SessionKey::generate()?;
        self.emit(AuthEvent {
            kind: AuthEventKind::SignedIn,
            key: key.clone(),
            session: Some(session.clone()),
        });
        Ok((key, session))
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn session(&self, key: &SessionKey) -> Result<Option<Session>, IdentityError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_session_lookups.load(Ordering::SeqCst) {
            return Err(IdentityError::Response("provider down".to_string()));
        }
        Ok(self.lock_sessions().get(key).cloned())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<(SessionKey, Session), IdentityError> {
        let account = self
            .accounts
            .lock()
            .ok()
            .and_then(|accounts| accounts.get(email).cloned());
        match account {
            Some((expected, session)) if expected == password.expose_secret() => {
                self.sign_in(session)
            }
            _ => Err(IdentityError::Rejected(
                "Invalid login credentials".to_string(),
            )),
        }
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, IdentityError> {
        let exists = self
            .accounts
            .lock()
            .map(|accounts| accounts.contains_key(&request.email))
            .unwrap_or(false);
        if exists {
            return Err(IdentityError::Rejected(
                "User already registered".to_string(),
            ));
        }

        let role = request
            .metadata
            .get("role")
            .and_then(Value::as_str)
            .map(str::to_string);
        let session = Self::session(Uuid::new_v4(), &request.email, role.as_deref());
        self.add_account(
            &request.email,
            request.password.expose_secret(),
            session.clone(),
        );

        if self.require_confirmation.load(Ordering::SeqCst) {
            return Ok(SignUpOutcome::ConfirmationRequired { user: session.user });
        }
        let (key, session) = self.sign_in(session)?;
        Ok(SignUpOutcome::SignedIn { key, session })
    }

    async fn verify_email(
        &self,
        token_hash: &str,
        _kind: &str,
    ) -> Result<(SessionKey, Session), IdentityError> {
        let session = self
            .confirmations
            .lock()
            .ok()
            .and_then(|mut confirmations| confirmations.remove(token_hash));
        match session {
            Some(session) => self.sign_in(session),
            None => Err(IdentityError::Rejected(
                "Email link is invalid or has expired".to_string(),
            )),
        }
    }

    async fn sign_out(&self, key: &SessionKey) -> Result<(), IdentityError> {
        if self.has_session(key) {
            self.emit(AuthEvent {
                kind: AuthEventKind::SignedOut,
                key: key.clone(),
                session: None,
            });
        }
        Ok(())
    }

    async fn evict_expired(&self, grace_seconds: i64) -> Vec<SessionKey> {
        let expired: Vec<SessionKey> = self
            .lock_sessions()
            .iter()
            .filter(|(_, session)| session.expired_for(grace_seconds))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.emit(AuthEvent {
                kind: AuthEventKind::SignedOut,
                key: key.clone(),
                session: None,
            });
        }
        expired
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
