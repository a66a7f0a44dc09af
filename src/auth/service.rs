//! Auth state for every live session key.
//!
//! Flow Overview:
//! 1) `snapshot` on an unknown key bootstraps it: fetch the provider session,
//!    resolve the role, publish a settled snapshot.
//! 2) `start` subscribes to provider auth-state-change events; each event
//!    re-resolves through the same [`AuthService::resolve`] path, and
//!    `SignedOut` drops the entry.
//! 3) `start` also runs a sweep every minute that evicts sessions expired for
//!    longer than the session TTL, at the provider and in the cache.
//! 4) `shutdown` stops both tasks and forgets every session.
//!
//! Each entry carries an epoch. A resolution only lands if its epoch is still
//! current, so a slow bootstrap can never overwrite a newer event.

use super::role::{Role, RoleResolver};
use crate::identity::{AuthEvent, AuthEventKind, Identity, IdentityProvider, Session, SessionKey};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast::error::RecvError, watch, RwLock},
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Auth state as seen by guards and handlers.
#[derive(Clone, Debug)]
pub struct AuthSnapshot {
    pub loading: bool,
    pub session: Option<Session>,
    pub user: Option<Identity>,
    pub role: Option<Role>,
}

impl AuthSnapshot {
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            loading: true,
            session: None,
            user: None,
            role: None,
        }
    }

    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            loading: false,
            session: None,
            user: None,
            role: None,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.is_some_and(Role::is_admin)
    }
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SESSION_TTL_SECONDS: i64 = 60 * 60 * 24 * 7;

struct Entry {
    epoch: u64,
    tx: watch::Sender<AuthSnapshot>,
}

pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    resolver: RoleResolver,
    settle_timeout: Duration,
    session_ttl_seconds: i64,
    sessions: RwLock<HashMap<SessionKey, Entry>>,
    next_epoch: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        resolver: RoleResolver,
        settle_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            resolver,
            settle_timeout,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            sessions: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// How long past token expiry an idle session is kept (the cookie lifetime).
    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Subscribe to provider events and start the expiry sweep. Calling it
    /// again replaces both tasks.
    pub fn start(self: &Arc<Self>) {
        let mut events = self.provider.subscribe();
        let service = Arc::downgrade(self);

        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(service) = service.upgrade() else {
                            break;
                        };
                        service.handle(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth events lagged, dropping cached sessions");
                        let Some(service) = service.upgrade() else {
                            break;
                        };
                        service.sessions.write().await.clear();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("auth listener stopped");
        });

        let service = Arc::downgrade(self);
        let sweeper = tokio::spawn(async move {
            let mut ticks = interval(SWEEP_INTERVAL);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.sweep().await;
            }
        });

        let previous = std::mem::replace(&mut *self.lock_tasks(), vec![listener, sweeper]);
        for task in previous {
            task.abort();
        }
        info!("auth service listening for session changes");
    }

    /// Stop the background tasks and forget every cached session.
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            task.abort();
        }
        self.sessions.write().await.clear();
        info!("auth service stopped");
    }

    /// Evict sessions expired for longer than the session TTL, plus cached
    /// entries that no longer hold a session. Returns the number of cache
    /// entries removed.
    pub async fn sweep(&self) -> usize {
        let evicted = self.provider.evict_expired(self.session_ttl_seconds).await;
        let ttl = self.session_ttl_seconds;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        for key in &evicted {
            sessions.remove(key);
        }
        sessions.retain(|_, entry| {
            let snapshot = entry.tx.borrow();
            snapshot.loading
                || snapshot
                    .session
                    .as_ref()
                    .is_some_and(|session| !session.expired_for(ttl))
        });
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "swept auth cache");
        }
        removed
    }

    /// Current auth state for a key, bootstrapping it on first sight.
    ///
    /// Waits up to the settle timeout for a pending resolution; if it is still
    /// pending the returned snapshot has `loading = true`.
    pub async fn snapshot(self: &Arc<Self>, key: Option<&SessionKey>) -> AuthSnapshot {
        let Some(key) = key else {
            return AuthSnapshot::signed_out();
        };

        // A channel can close under us when the entry is evicted; one retry re-bootstraps.
        for _ in 0..2 {
            if let Some(snapshot) = self.try_snapshot(key).await {
                return snapshot;
            }
        }
        AuthSnapshot::signed_out()
    }

    /// Drop a key right away instead of waiting for the `SignedOut` event.
    pub async fn forget(&self, key: &SessionKey) {
        self.sessions.write().await.remove(key);
    }

    /// Single resolution path shared by bootstrap and event handling.
    pub async fn resolve(&self, session: Option<Session>) -> AuthSnapshot {
        let Some(session) = session else {
            return AuthSnapshot::signed_out();
        };
        let role = self.resolver.resolve(&session).await;
        AuthSnapshot {
            loading: false,
            user: Some(session.user.clone()),
            session: Some(session),
            role,
        }
    }

    async fn try_snapshot(self: &Arc<Self>, key: &SessionKey) -> Option<AuthSnapshot> {
        let (mut rx, bootstrap_epoch) = {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get(key) {
                (entry.tx.subscribe(), None)
            } else {
                let epoch = self.next_epoch();
                let (tx, rx) = watch::channel(AuthSnapshot::initial());
                sessions.insert(key.clone(), Entry { epoch, tx });
                (rx, Some(epoch))
            }
        };

        if let Some(epoch) = bootstrap_epoch {
            // Detached so a dropped request cannot leave the entry loading forever.
            let service = Arc::clone(self);
            let key = key.clone();
            tokio::spawn(async move { service.bootstrap(key, epoch).await });
        }

        let settled = timeout(self.settle_timeout, rx.wait_for(|snapshot| !snapshot.loading))
            .await
            .map(|result| result.map(|snapshot| AuthSnapshot::clone(&snapshot)));

        match settled {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(_closed)) => None,
            Err(_elapsed) => {
                warn!(?key, "auth state still loading after settle timeout");
                Some(rx.borrow().clone())
            }
        }
    }

    async fn bootstrap(&self, key: SessionKey, epoch: u64) {
        let session = match self.provider.session(&key).await {
            Ok(session) => session,
            Err(err) => {
                warn!(?key, "session bootstrap failed, treating as signed out: {err}");
                None
            }
        };
        let known = session.is_some();
        let snapshot = self.resolve(session).await;
        self.publish(&key, epoch, snapshot).await;

        if !known {
            // Unknown keys are not worth remembering.
            let mut sessions = self.sessions.write().await;
            if sessions.get(&key).is_some_and(|entry| entry.epoch == epoch) {
                sessions.remove(&key);
            }
        }
    }

    async fn handle(self: &Arc<Self>, event: AuthEvent) {
        debug!(kind = ?event.kind, key = ?event.key, "auth event");

        if event.kind == AuthEventKind::SignedOut {
            self.forget(&event.key).await;
            return;
        }

        let epoch = self.begin(&event.key, event.session.as_ref()).await;
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let snapshot = service.resolve(event.session).await;
            service.publish(&event.key, epoch, snapshot).await;
        });
    }

    /// Start a new epoch for a key and mark it loading.
    async fn begin(&self, key: &SessionKey, session: Option<&Session>) -> u64 {
        let epoch = self.next_epoch();
        let pending = AuthSnapshot {
            loading: true,
            session: session.cloned(),
            user: session.map(|session| session.user.clone()),
            role: None,
        };

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(key) {
            entry.epoch = epoch;
            entry.tx.send_replace(pending);
        } else {
            let (tx, _rx) = watch::channel(pending);
            sessions.insert(key.clone(), Entry { epoch, tx });
        }
        epoch
    }

    async fn publish(&self, key: &SessionKey, epoch: u64, snapshot: AuthSnapshot) {
        let sessions = self.sessions.read().await;
        match sessions.get(key) {
            Some(entry) if entry.epoch == epoch => {
                entry.tx.send_replace(snapshot);
            }
            _ => debug!(?key, epoch, "discarding stale auth resolution"),
        }
    }

    fn next_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    pub(crate) async fn cached_keys(&self) -> usize {
        self.sessions.read().await.len()
    }
}
