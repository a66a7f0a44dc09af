//! Student and admin login, plus the login/sign-up page views.
//!
//! Flow Overview:
//! 1) Password sign-in at the identity provider.
//! 2) Resolve the role through the auth service.
//! 3) A role that does not match the login variant is signed out again.

use super::{
    session::{clear_session_cookie, end_session, session_cookie, with_cookie},
    state::AuthConfig,
};
use crate::{
    api::handlers::{current_auth, see_other, valid_email, ApiError},
    auth::{paths, AuthService, Role},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

pub(crate) const ADMIN_ON_STUDENT_LOGIN: &str =
    "This is an admin account. Please use Admin Login instead.";
pub(crate) const STUDENT_ON_ADMIN_LOGIN: &str =
    "This account does not have admin privileges. Use Student Login instead.";
pub(crate) const PROFILE_NOT_FOUND: &str = "Account profile not found";

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub role: Role,
    pub redirect_to: String,
}

/// Payload of the login and sign-up page routes.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthPage {
    pub page: String,
    /// Set when a visitor with the other role was signed out.
    pub message: Option<String>,
    pub redirect_to: Option<String>,
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in as a student", body = LoginResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Admin account on student login, or no role"),
    ),
    tag = "auth"
)]
pub async fn login(
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
    Json(request): Json<LoginRequest>,
) -> Response {
    sign_in_as(&auth, &config, request, Role::User)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

#[utoipa::path(
    post,
    path = "/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in as an admin", body = LoginResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account is not an admin, or has no role"),
    ),
    tag = "auth"
)]
pub async fn admin_login(
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
    Json(request): Json<LoginRequest>,
) -> Response {
    sign_in_as(&auth, &config, request, Role::Admin)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

#[instrument(skip(auth, config, request), fields(email = %request.email))]
async fn sign_in_as(
    auth: &Arc<AuthService>,
    config: &AuthConfig,
    request: LoginRequest,
    expected: Role,
) -> Result<Response, ApiError> {
    let email = request.email.trim().to_string();
    if !valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }
    if request.password.is_empty() {
        return Err(ApiError::BadRequest("Password is required".to_string()));
    }

    let password = SecretString::from(request.password);
    let (key, session) = auth
        .provider()
        .sign_in_with_password(&email, &password)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::BadRequest(message) => ApiError::Unauthorized(message),
            other => other,
        })?;

    // Guards treat a session without a role as signed out, so login does too.
    let Some(role) = auth.resolve(Some(session)).await.role else {
        end_session(auth, &key).await;
        return Err(ApiError::Forbidden(PROFILE_NOT_FOUND.to_string()));
    };

    if role != expected {
        end_session(auth, &key).await;
        let message = match expected {
            Role::Admin => STUDENT_ON_ADMIN_LOGIN,
            Role::User => ADMIN_ON_STUDENT_LOGIN,
        };
        return Err(ApiError::Forbidden(message.to_string()));
    }

    info!(%role, "signed in");
    let response = (
        StatusCode::OK,
        Json(LoginResponse {
            role,
            redirect_to: dashboard(role).to_string(),
        }),
    )
        .into_response();
    Ok(with_cookie(response, session_cookie(config, &key)))
}

pub(crate) const fn dashboard(role: Role) -> &'static str {
    match role {
        Role::Admin => paths::ADMIN_DASHBOARD,
        Role::User => paths::USER_APP,
    }
}

/// Which page variant is being visited.
#[derive(Clone, Copy)]
enum AuthPageKind {
    Login,
    Signup,
    AdminLogin,
    AdminSignup,
}

impl AuthPageKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Signup => "signup",
            Self::AdminLogin => "admin_login",
            Self::AdminSignup => "admin_signup",
        }
    }

    const fn for_admins(self) -> bool {
        matches!(self, Self::AdminLogin | Self::AdminSignup)
    }

    /// Message and follow-up path for a visitor signed in with the other role.
    const fn mismatch(self) -> (&'static str, &'static str) {
        match self {
            Self::Login => (
                "Admins cannot use Student Login. Redirecting to Admin Login...",
                paths::ADMIN_LOGIN,
            ),
            Self::Signup => (
                "Admins cannot use Student Sign Up. Redirecting to Admin area...",
                paths::ADMIN_LOGIN,
            ),
            Self::AdminLogin => (
                "Students cannot use Admin Login. Redirecting to Student Login...",
                paths::LOGIN,
            ),
            Self::AdminSignup => (
                "Already logged in as student. Please sign out first to create an admin account.",
                paths::ADMIN_SIGNUP,
            ),
        }
    }
}

/// Page view shared by the four login/sign-up routes.
async fn auth_page(
    kind: AuthPageKind,
    headers: &HeaderMap,
    auth: &Arc<AuthService>,
    config: &AuthConfig,
) -> Response {
    let (key, snapshot) = current_auth(headers, auth).await;
    if snapshot.loading {
        return ApiError::Loading.into_response();
    }

    let page = |message: Option<&str>, redirect_to: Option<&str>| {
        Json(AuthPage {
            page: kind.name().to_string(),
            message: message.map(str::to_string),
            redirect_to: redirect_to.map(str::to_string),
        })
        .into_response()
    };

    // A session without a role is as good as none here.
    let key = key.filter(|_| snapshot.session.is_some());
    let (Some(key), Some(role)) = (key, snapshot.role) else {
        return page(None, None);
    };

    if role.is_admin() == kind.for_admins() {
        return see_other(dashboard(role));
    }

    end_session(auth, &key).await;
    let (message, redirect_to) = kind.mismatch();
    with_cookie(
        page(Some(message), Some(redirect_to)),
        clear_session_cookie(config),
    )
}

#[utoipa::path(
    get,
    path = "/login",
    responses(
        (status = 200, description = "Page view", body = AuthPage),
        (status = 303, description = "Already signed in with the matching role"),
    ),
    tag = "pages"
)]
pub async fn login_page(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
) -> Response {
    auth_page(AuthPageKind::Login, &headers, &auth, &config).await
}

#[utoipa::path(
    get,
    path = "/signup",
    responses(
        (status = 200, description = "Page view", body = AuthPage),
        (status = 303, description = "Already signed in with the matching role"),
    ),
    tag = "pages"
)]
pub async fn signup_page(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
) -> Response {
    auth_page(AuthPageKind::Signup, &headers, &auth, &config).await
}

#[utoipa::path(
    get,
    path = "/admin/login",
    responses(
        (status = 200, description = "Page view", body = AuthPage),
        (status = 303, description = "Already signed in with the matching role"),
    ),
    tag = "pages"
)]
pub async fn admin_login_page(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
) -> Response {
    auth_page(AuthPageKind::AdminLogin, &headers, &auth, &config).await
}

#[utoipa::path(
    get,
    path = "/admin/signup",
    responses(
        (status = 200, description = "Page view", body = AuthPage),
        (status = 303, description = "Already signed in with the matching role"),
    ),
    tag = "pages"
)]
pub async fn admin_signup_page(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    config: Extension<AuthConfig>,
) -> Response {
    auth_page(AuthPageKind::AdminSignup, &headers, &auth, &config).await
}
