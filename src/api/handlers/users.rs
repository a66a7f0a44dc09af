//! Admin view of registered users.

use super::{
    profile::{UserDetails, USER_DETAILS_COLUMNS},
    require, ApiError,
};
use crate::auth::{admin_only, AuthService, Role};
use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use utoipa::IntoParams;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct UserFilter {
    /// Only return users with this role (`user` or `admin`).
    pub role: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/admin/users",
    params(UserFilter),
    responses(
        (status = 200, description = "Users, newest first", body = [UserDetails]),
        (status = 400, description = "Unknown role filter"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
    ),
    tag = "admin"
)]
pub async fn list_users(
    headers: HeaderMap,
    Query(filter): Query<UserFilter>,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;

    let role = match filter.role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) if value.eq_ignore_ascii_case("admin") => Some(Role::Admin),
        Some(value) if value.eq_ignore_ascii_case("user") => Some(Role::User),
        Some(value) => return Err(ApiError::BadRequest(format!("Unknown role: {value}"))),
    };
    Ok(Json(fetch_users(&pool, role).await?))
}

pub(crate) async fn fetch_users(
    pool: &PgPool,
    role: Option<Role>,
) -> Result<Vec<UserDetails>, sqlx::Error> {
    let query = format!(
        r"
        SELECT {USER_DETAILS_COLUMNS}
        FROM user_details
        WHERE $1::boolean IS NULL OR (lower(trim(coalesce(role, ''))) = 'admin') = $1
        ORDER BY created_at DESC
        "
    );
    let rows = sqlx::query(&query)
        .bind(role.map(Role::is_admin))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(UserDetails::from_row).collect())
}
