//! Email confirmation landing route.

use super::{
    login::dashboard,
    session::{end_session, session_cookie, with_cookie},
    state::AuthConfig,
};
use crate::{
    api::handlers::{current_auth, see_other, ApiError},
    auth::{paths, AuthService},
};
use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackParams {
    pub token_hash: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackParams),
    responses(
        (status = 303, description = "Redirect to the dashboard for the confirmed role, or to login when no role resolves"),
        (status = 503, description = "Auth state is still loading")
    ),
    tag = "pages"
)]
pub async fn callback(
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
) -> Response {
    let token_hash = params
        .token_hash
        .as_deref()
        .map(str::trim)
        .filter(|hash| !hash.is_empty());

    if let Some(token_hash) = token_hash {
        let kind = params.kind.as_deref().unwrap_or("signup");
        return match auth.provider().verify_email(token_hash, kind).await {
            Ok((key, session)) => match auth.resolve(Some(session)).await.role {
                Some(role) => {
                    info!(%role, "email confirmed");
                    with_cookie(see_other(dashboard(role)), session_cookie(&config, &key))
                }
                None => {
                    warn!("Email confirmed but no role resolved, signing out");
                    end_session(&auth, &key).await;
                    see_other(paths::LOGIN)
                }
            },
            Err(err) => {
                warn!("Email confirmation failed: {err}");
                see_other(paths::LOGIN)
            }
        };
    }

    // No token: route by whatever session the visitor already has.
    let (_key, snapshot) = current_auth(&headers, &auth).await;
    if snapshot.loading {
        return ApiError::Loading.into_response();
    }
    match (snapshot.session, snapshot.role) {
        (Some(_), Some(role)) => see_other(dashboard(role)),
        _ => see_other(paths::LOGIN),
    }
}
