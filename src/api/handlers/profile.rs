//! The caller's own `user_details` row.

use super::{normalize_optional, require, ApiError, Principal};
use crate::auth::{user_only, AuthService};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

pub(crate) const USER_DETAILS_COLUMNS: &str = r#"
    user_id,
    auth_id::text AS auth_id,
    name,
    username,
    role,
    points,
    total_points_earned,
    total_points_donated,
    quest_completed,
    to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at
"#;

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDetails {
    pub user_id: i64,
    pub auth_id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub points: i64,
    pub total_points_earned: i64,
    pub total_points_donated: i64,
    pub quest_completed: i64,
    pub created_at: String,
}

impl UserDetails {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            user_id: row.get("user_id"),
            auth_id: row.get("auth_id"),
            name: row.get("name"),
            username: row.get("username"),
            role: row.get("role"),
            points: row.get("points"),
            total_points_earned: row.get("total_points_earned"),
            total_points_donated: row.get("total_points_donated"),
            quest_completed: row.get("quest_completed"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub username: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Own profile", body = UserDetails),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins use the dashboard"),
        (status = 404, description = "No profile row"),
    ),
    tag = "profile"
)]
pub async fn get_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;
    Ok(Json(require_details(&pool, &principal).await?))
}

#[utoipa::path(
    patch,
    path = "/v1/me",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserDetails),
        (status = 400, description = "No updates provided"),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "No profile row"),
    ),
    tag = "profile"
)]
pub async fn patch_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    Json(payload): Json<ProfileUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;

    let name = normalize_optional(payload.name);
    let username = normalize_optional(payload.username);
    if name.is_none() && username.is_none() {
        return Err(ApiError::BadRequest("No updates provided.".to_string()));
    }

    let query = format!(
        r"
        UPDATE user_details
        SET
            name = COALESCE($1, name),
            username = COALESCE($2, username)
        WHERE auth_id = $3
        RETURNING {USER_DETAILS_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(name)
        .bind(username)
        .bind(principal.auth_id())
        .fetch_optional(&*pool)
        .await?;

    row.map(|row| Json(UserDetails::from_row(&row)))
        .ok_or_else(profile_missing)
}

pub(crate) async fn fetch_by_auth_id(
    pool: &PgPool,
    auth_id: Uuid,
) -> Result<Option<UserDetails>, sqlx::Error> {
    let query = format!("SELECT {USER_DETAILS_COLUMNS} FROM user_details WHERE auth_id = $1 LIMIT 1");
    let row = sqlx::query(&query).bind(auth_id).fetch_optional(pool).await?;
    Ok(row.as_ref().map(UserDetails::from_row))
}

/// The caller's row, or 404 when sign-up never created one.
pub(crate) async fn require_details(
    pool: &PgPool,
    principal: &Principal,
) -> Result<UserDetails, ApiError> {
    fetch_by_auth_id(pool, principal.auth_id())
        .await?
        .ok_or_else(profile_missing)
}

fn profile_missing() -> ApiError {
    ApiError::NotFound("User profile not found".to_string())
}

#[cfg(test)]
mod tests {
    use crate::api::handlers::testing::TestApp;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn anonymous_profile_is_unauthorized() -> anyhow::Result<()> {
        let app = TestApp::new();
        let response = app.router().oneshot(app.get("/v1/me", None)?).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn admins_are_forbidden_from_student_profile() -> anyhow::Result<()> {
        let app = TestApp::new();
        let key = app.signed_in(Uuid::new_v4(), "boss@example.com", Some("admin"));
        let response = app.router().oneshot(app.get("/v1/me", Some(&key))?).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn empty_update_is_rejected() -> anyhow::Result<()> {
        let app = TestApp::new();
        let key = app.signed_in(Uuid::new_v4(), "kid@example.com", Some("user"));
        let response = app
            .router()
            .oneshot(
                Request::patch("/v1/me")
                    .header("authorization", format!("Bearer {}", key.as_str()))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "  "}"#))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
