//! Student and admin sign-up.
//!
//! The provider creates the identity (with `full_name` and `role` metadata);
//! the matching `user_details` row is then upserted with the same role. A
//! failed upsert is logged and does not fail the sign-up.

use super::{
    login::{dashboard, PROFILE_NOT_FOUND},
    session::{end_session, session_cookie, with_cookie},
    state::AuthConfig,
};
use crate::{
    api::handlers::{normalize_optional, valid_email, ApiError},
    auth::{AuthService, Role},
    identity::{SignUpOutcome, SignUpRequest},
};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    /// Present when the account is signed in right away.
    pub redirect_to: Option<String>,
    /// Present when the provider wants the email confirmed first.
    pub message: Option<String>,
}

#[utoipa::path(
    post,
    path = "/signup",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Student account created", body = RegisterResponse),
        (status = 400, description = "Invalid input or rejected by the provider"),
        (status = 403, description = "Signed in but no role could be resolved"),
    ),
    tag = "auth"
)]
pub async fn signup(
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    register(&pool, &auth, &config, request, Role::User)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

#[utoipa::path(
    post,
    path = "/admin/signup",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Admin account created", body = RegisterResponse),
        (status = 400, description = "Invalid input or rejected by the provider"),
    ),
    tag = "auth"
)]
pub async fn admin_signup(
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    register(&pool, &auth, &config, request, Role::Admin)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

pub(crate) const fn confirmation_message(role: Role) -> &'static str {
    match role {
        Role::Admin => {
            "Check your email to confirm your account. After confirmation, log in via Admin Login."
        }
        Role::User => "Check your email to confirm your account, then log in via Student Login.",
    }
}

#[instrument(skip(pool, auth, config, request), fields(email = %request.email, %role))]
async fn register(
    pool: &PgPool,
    auth: &Arc<AuthService>,
    config: &AuthConfig,
    request: RegisterRequest,
    role: Role,
) -> Result<Response, ApiError> {
    let email = request.email.trim().to_string();
    if !valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let full_name = normalize_optional(request.full_name);

    let outcome = auth
        .provider()
        .sign_up(SignUpRequest {
            email,
            password: SecretString::from(request.password),
            metadata: json!({ "full_name": full_name, "role": role.as_str() }),
        })
        .await?;

    let auth_id = match &outcome {
        SignUpOutcome::SignedIn { session, .. } => session.user.id,
        SignUpOutcome::ConfirmationRequired { user } => user.id,
    };
    if let Err(err) = upsert_user_details(pool, auth_id, full_name.as_deref(), role).await {
        warn!("Could not update user details: {err}");
    }

    match outcome {
        SignUpOutcome::SignedIn { key, session } => {
            let Some(resolved) = auth.resolve(Some(session)).await.role else {
                end_session(auth, &key).await;
                return Err(ApiError::Forbidden(PROFILE_NOT_FOUND.to_string()));
            };
            info!(role = %resolved, "signed up and signed in");
            let response = (
                StatusCode::CREATED,
                Json(RegisterResponse {
                    redirect_to: Some(dashboard(resolved).to_string()),
                    message: None,
                }),
            )
                .into_response();
            Ok(with_cookie(response, session_cookie(config, &key)))
        }
        SignUpOutcome::ConfirmationRequired { .. } => {
            info!("signed up, awaiting email confirmation");
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponse {
                    redirect_to: None,
                    message: Some(confirmation_message(role).to_string()),
                }),
            )
                .into_response())
        }
    }
}

async fn upsert_user_details(
    pool: &PgPool,
    auth_id: Uuid,
    name: Option<&str>,
    role: Role,
) -> Result<(), sqlx::Error> {
    let query = r"
        INSERT INTO user_details (auth_id, name, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (auth_id)
        DO UPDATE SET role = EXCLUDED.role, name = COALESCE(EXCLUDED.name, user_details.name)
    ";
    sqlx::query(query)
        .bind(auth_id)
        .bind(name)
        .bind(role.as_str())
        .execute(pool)
        .await?;
    Ok(())
}
