//! Role resolution: token claim first, then the `user_details` row.

use crate::identity::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::{fmt, sync::Arc};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    /// `admin` (any case) is an administrator; any other non-empty value is a
    /// regular user. Empty strings are "no role".
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            None
        } else if value.eq_ignore_ascii_case("admin") {
            Some(Self::Admin)
        } else {
            Some(Self::User)
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the fallback role comes from when the token carries none.
#[async_trait]
pub trait RoleLookup: Send + Sync {
    async fn stored_role(&self, auth_id: Uuid) -> Result<Option<String>, sqlx::Error>;
}

#[async_trait]
impl RoleLookup for PgPool {
    async fn stored_role(&self, auth_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        let role = sqlx::query_scalar::<_, Option<String>>(
            "SELECT role FROM user_details WHERE auth_id = $1 LIMIT 1",
        )
        .bind(auth_id)
        .fetch_optional(self)
        .await?;
        Ok(role.flatten())
    }
}

#[derive(Clone)]
pub struct RoleResolver {
    lookup: Arc<dyn RoleLookup>,
}

impl RoleResolver {
    #[must_use]
    pub fn new(lookup: Arc<dyn RoleLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve the acting role for a session. Lookup failures are logged and
    /// yield `None`; guards treat that as not signed in.
    #[instrument(skip_all, fields(user_id = %session.user.id))]
    pub async fn resolve(&self, session: &Session) -> Option<Role> {
        if let Some(role) = session.role_claim().as_deref().and_then(Role::parse) {
            debug!(%role, "role from token claim");
            return Some(role);
        }

        match self.lookup.stored_role(session.user.id).await {
            Ok(stored) => stored.as_deref().and_then(Role::parse),
            Err(err) => {
                warn!("role lookup failed: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct StaticRoles {
    roles: std::collections::HashMap<Uuid, String>,
    pub(crate) calls: std::sync::atomic::AtomicUsize,
    pub(crate) fail: bool,
}

#[cfg(test)]
impl StaticRoles {
    pub(crate) fn new(roles: impl IntoIterator<Item = (Uuid, &'static str)>) -> Self {
        Self {
            roles: roles
                .into_iter()
                .map(|(id, role)| (id, role.to_string()))
                .collect(),
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new([])
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl RoleLookup for StaticRoles {
    async fn stored_role(&self, auth_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self.roles.get(&auth_id).cloned())
    }
}
