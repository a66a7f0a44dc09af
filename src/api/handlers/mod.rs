//! API handlers and shared utilities for Greenquest.
//!
//! Page routes (`/app`, `/admin`, ...) answer with a guard decision turned into
//! HTTP (`303` redirect, `503` while loading) or the page's JSON view. The
//! `/v1` data routes map the same decisions to `401`/`403`/`503`.

pub mod assignments;
pub mod auth;
pub mod charities;
pub mod community;
pub mod health;
pub mod pages;
pub mod points;
pub mod profile;
pub mod quests;
pub mod submissions;
pub mod users;

use crate::{
    auth::{paths, AuthService, AuthSnapshot, GuardDecision, Role},
    identity::{IdentityError, Session, SessionKey},
    storage::StorageError,
};
use axum::{
    http::{
        header::{LOCATION, RETRY_AFTER},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// Seconds a client should wait before retrying while auth state settles.
const LOADING_RETRY_AFTER_SECONDS: &str = "1";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Auth state is still loading")]
    Loading,
    #[error("{0}")]
    Upstream(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Loading => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn not_signed_in() -> Self {
        Self::Unauthorized("Not signed in".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Database(err) => {
                error!("Database error: {err}");
                "Internal server error".to_string()
            }
            Self::Upstream(detail) => {
                warn!("Upstream error: {detail}");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static(LOADING_RETRY_AFTER_SECONDS));
        }
        response
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected(message) => Self::BadRequest(message),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        if err.is_client_error() {
            Self::BadRequest(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

/// Lightweight email sanity check used by auth handlers before calling the provider.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Trim and drop empty strings.
pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The signed-in caller of a `/v1` route.
#[derive(Clone, Debug)]
pub struct Principal {
    pub key: SessionKey,
    pub session: Session,
    pub role: Role,
}

impl Principal {
    #[must_use]
    pub fn auth_id(&self) -> uuid::Uuid {
        self.session.user.id
    }
}

/// Session key and settled auth state for a request.
pub(crate) async fn current_auth(
    headers: &HeaderMap,
    auth: &Arc<AuthService>,
) -> (Option<SessionKey>, AuthSnapshot) {
    let key = auth::session::extract_session_key(headers);
    let snapshot = auth.snapshot(key.as_ref()).await;
    (key, snapshot)
}

/// Turn a page guard decision into a response, or `None` to render the page.
pub(crate) fn page_gate(decision: GuardDecision) -> Option<Response> {
    match decision {
        GuardDecision::Render => None,
        GuardDecision::Loading => Some(ApiError::Loading.into_response()),
        GuardDecision::Redirect(redirect) => Some(see_other(&redirect.location())),
    }
}

/// Same decision for `/v1` routes: redirects to a login page mean "not signed
/// in", redirects to the other dashboard mean "wrong role".
pub(crate) fn api_gate(decision: GuardDecision) -> Result<(), ApiError> {
    match decision {
        GuardDecision::Render => Ok(()),
        GuardDecision::Loading => Err(ApiError::Loading),
        GuardDecision::Redirect(redirect)
            if redirect.to == paths::LOGIN || redirect.to == paths::ADMIN_LOGIN =>
        {
            Err(ApiError::not_signed_in())
        }
        GuardDecision::Redirect(_) => Err(ApiError::Forbidden("Forbidden".to_string())),
    }
}

/// Authorize a `/v1` request with the given guard.
pub(crate) async fn require(
    headers: &HeaderMap,
    auth: &Arc<AuthService>,
    guard: fn(&AuthSnapshot, &str) -> GuardDecision,
) -> Result<Principal, ApiError> {
    let (key, snapshot) = current_auth(headers, auth).await;
    api_gate(guard(&snapshot, ""))?;

    match (key, snapshot.session, snapshot.role) {
        (Some(key), Some(session), Some(role)) => Ok(Principal { key, session, role }),
        _ => Err(ApiError::not_signed_in()),
    }
}

pub(crate) fn see_other(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::SEE_OTHER, [(LOCATION, value)]).into_response(),
        Err(err) => {
            error!("Invalid redirect location {location}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Redirect;
    use axum::body::to_bytes;

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("a @example.com"));
    }

    #[test]
    fn normalize_optional_trims() {
        assert_eq!(normalize_optional(Some("  Ada ".to_string())), Some("Ada".to_string()));
        assert_eq!(normalize_optional(Some("   ".to_string())), None);
        assert_eq!(normalize_optional(None), None);
    }

    #[test]
    fn api_gate_maps_decisions() {
        assert!(api_gate(GuardDecision::Render).is_ok());
        assert!(matches!(api_gate(GuardDecision::Loading), Err(ApiError::Loading)));
        assert!(matches!(
            api_gate(GuardDecision::Redirect(Redirect {
                to: paths::ADMIN_LOGIN,
                from: None
            })),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            api_gate(GuardDecision::Redirect(Redirect {
                to: paths::USER_APP,
                from: None
            })),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn loading_response_sets_retry_after() -> anyhow::Result<()> {
        let response = page_gate(GuardDecision::Loading)
            .ok_or_else(|| anyhow::anyhow!("expected a response"))?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from_static("1"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn database_errors_hide_details() -> anyhow::Result<()> {
        let response = ApiError::Database(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(value["error"], "Internal server error");
        Ok(())
    }

    #[test]
    fn identity_rejections_are_bad_requests() {
        let err = ApiError::from(IdentityError::Rejected("User already registered".to_string()));
        assert!(matches!(err, ApiError::BadRequest(message) if message == "User already registered"));
        let err = ApiError::from(IdentityError::Response("boom".to_string()));
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}
