//! Session cookie handling, the session probe and logout.

use super::state::AuthConfig;
use crate::{
    api::handlers::{current_auth, see_other},
    auth::{paths, AuthService, Role},
    identity::SessionKey,
};
use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

pub const SESSION_COOKIE_NAME: &str = "greenquest_session";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<Role>,
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session"),
        (status = 503, description = "Auth state is still loading")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
) -> impl IntoResponse {
    let (_key, snapshot) = current_auth(&headers, &auth).await;
    if snapshot.loading {
        return crate::api::handlers::ApiError::Loading.into_response();
    }
    match snapshot.user {
        Some(user) => (
            StatusCode::OK,
            Json(SessionResponse {
                user_id: user.id.to_string(),
                email: user.email,
                role: snapshot.role,
            }),
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 303, description = "Session cleared, redirect to login")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
) -> Response {
    if let Some(key) = extract_session_key(&headers) {
        end_session(&auth, &key).await;
    }

    // Always clear the cookie, even if the session was already gone.
    let mut response = see_other(paths::LOGIN);
    if let Ok(cookie) = clear_session_cookie(&config) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

/// Sign out at the provider and drop the cached auth state.
pub(crate) async fn end_session(auth: &Arc<AuthService>, key: &SessionKey) {
    if let Err(err) = auth.provider().sign_out(key).await {
        error!("Failed to sign out: {err}");
    }
    auth.forget(key).await;
    info!(?key, "session ended");
}

/// Build a secure `HttpOnly` cookie for the session key.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    key: &SessionKey,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}",
        key.as_str()
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Attach a cookie header to a response, logging if it cannot be built.
pub(crate) fn with_cookie(
    mut response: Response,
    cookie: Result<HeaderValue, InvalidHeaderValue>,
) -> Response {
    match cookie {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    response
}

/// Bearer token first, then the session cookie. Malformed keys count as absent.
pub(crate) fn extract_session_key(headers: &HeaderMap) -> Option<SessionKey> {
    extract_bearer_token(headers)
        .or_else(|| extract_cookie(headers))
        .and_then(|token| SessionKey::parse(&token))
}

fn extract_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name.trim() == SESSION_COOKIE_NAME).then(|| value.trim().to_string())
        })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
