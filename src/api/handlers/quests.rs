//! Quest catalog (students) and quest management (admins).

use super::{normalize_optional, profile, require, ApiError};
use crate::auth::{admin_only, user_only, AuthService};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

pub const DEFAULT_QUEST_POINTS: i64 = 10;

const QUEST_COLUMNS: &str = r#"
    id,
    title,
    description,
    points,
    created_by,
    to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at
"#;

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Quest {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub points: i64,
    pub created_by: Option<i64>,
    pub created_at: String,
}

impl Quest {
    fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            points: row.get("points"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct QuestRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to 10 on create; unchanged on update when omitted.
    #[serde(default)]
    pub points: Option<i64>,
}

impl QuestRequest {
    fn validate(self) -> Result<(String, Option<String>, Option<i64>), ApiError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ApiError::BadRequest("Title is required.".to_string()));
        }
        if self.points.is_some_and(|points| points <= 0) {
            return Err(ApiError::BadRequest("Points must be positive.".to_string()));
        }
        Ok((title, normalize_optional(self.description), self.points))
    }
}

/// Submission state of a quest for one student, and what the quest card offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestAction {
    Start,
    PendingApproval,
    Completed,
    TryAgain,
}

impl QuestAction {
    /// Derive the action from the latest submission status, if any.
    #[must_use]
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            Some("pending") => Self::PendingApproval,
            Some("approved") => Self::Completed,
            Some("rejected") => Self::TryAgain,
            _ => Self::Start,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Start => "Start Quest",
            Self::PendingApproval => "Pending Approval",
            Self::Completed => "Completed",
            Self::TryAgain => "Rejected - Try Again",
        }
    }

    #[must_use]
    pub const fn enabled(self) -> bool {
        matches!(self, Self::Start | Self::TryAgain)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CatalogQuest {
    #[serde(flatten)]
    pub quest: Quest,
    /// `Quiz` when the title mentions a quiz, otherwise `Photo Challenge`.
    pub kind: String,
    pub submission_status: Option<String>,
    pub action: QuestAction,
    pub action_label: String,
    pub action_enabled: bool,
}

impl CatalogQuest {
    fn new(quest: Quest, submission_status: Option<String>) -> Self {
        let action = QuestAction::from_status(submission_status.as_deref());
        let kind = if quest.title.to_lowercase().contains("quiz") {
            "Quiz"
        } else {
            "Photo Challenge"
        };
        Self {
            quest,
            kind: kind.to_string(),
            submission_status,
            action,
            action_label: action.label().to_string(),
            action_enabled: action.enabled(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/quests",
    responses(
        (status = 200, description = "Quest catalog with the caller's submission state", body = [CatalogQuest]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins manage quests instead"),
    ),
    tag = "quests"
)]
pub async fn catalog(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;
    let details = profile::require_details(&pool, &principal).await?;
    Ok(Json(fetch_catalog(&pool, details.user_id).await?))
}

pub(crate) async fn fetch_catalog(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<CatalogQuest>, sqlx::Error> {
    let query = r#"
        SELECT
            q.id,
            q.title,
            q.description,
            q.points,
            q.created_by,
            to_char(q.created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
            s.status AS submission_status
        FROM quests q
        LEFT JOIN LATERAL (
            SELECT status
            FROM quest_submissions
            WHERE quest_id = q.id AND user_id = $1
            ORDER BY submitted_at DESC, id DESC
            LIMIT 1
        ) s ON TRUE
        ORDER BY q.created_at DESC
    "#;
    let rows = sqlx::query(query).bind(user_id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| CatalogQuest::new(Quest::from_row(row), row.get("submission_status")))
        .collect())
}

#[utoipa::path(
    get,
    path = "/v1/admin/quests",
    responses(
        (status = 200, description = "All quests, newest first", body = [Quest]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
    ),
    tag = "admin"
)]
pub async fn list_quests(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;
    Ok(Json(fetch_quests(&pool).await?))
}

pub(crate) async fn fetch_quests(pool: &PgPool) -> Result<Vec<Quest>, sqlx::Error> {
    let query = format!("SELECT {QUEST_COLUMNS} FROM quests ORDER BY created_at DESC");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(Quest::from_row).collect())
}

#[utoipa::path(
    post,
    path = "/v1/admin/quests",
    request_body = QuestRequest,
    responses(
        (status = 201, description = "Quest created", body = Quest),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
    ),
    tag = "admin"
)]
pub async fn create_quest(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    Json(payload): Json<QuestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, admin_only).await?;
    let (title, description, points) = payload.validate()?;

    let created_by = profile::fetch_by_auth_id(&pool, principal.auth_id())
        .await?
        .map(|details| details.user_id);

    let query = format!(
        r"
        INSERT INTO quests (title, description, points, created_by)
        VALUES ($1, $2, $3, $4)
        RETURNING {QUEST_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(&title)
        .bind(description)
        .bind(points.unwrap_or(DEFAULT_QUEST_POINTS))
        .bind(created_by)
        .fetch_one(&*pool)
        .await?;

    let quest = Quest::from_row(&row);
    info!(quest_id = quest.id, "Quest created");
    Ok((StatusCode::CREATED, Json(quest)))
}

#[utoipa::path(
    put,
    path = "/v1/admin/quests/{id}",
    params(("id" = i64, Path, description = "Quest id")),
    request_body = QuestRequest,
    responses(
        (status = 200, description = "Quest updated", body = Quest),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Quest not found"),
    ),
    tag = "admin"
)]
pub async fn update_quest(
    Path(id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    Json(payload): Json<QuestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;
    let (title, description, points) = payload.validate()?;

    let query = format!(
        r"
        UPDATE quests
        SET
            title = $1,
            description = $2,
            points = COALESCE($3, points)
        WHERE id = $4
        RETURNING {QUEST_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(&title)
        .bind(description)
        .bind(points)
        .bind(id)
        .fetch_optional(&*pool)
        .await?;

    row.map(|row| Json(Quest::from_row(&row)))
        .ok_or_else(|| ApiError::NotFound("Quest not found".to_string()))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/quests/{id}",
    params(("id" = i64, Path, description = "Quest id")),
    responses(
        (status = 204, description = "Quest and its assignments deleted"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Quest not found"),
    ),
    tag = "admin"
)]
pub async fn delete_quest(
    Path(id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;

    let mut tx = pool.begin().await?;
    let assignments = sqlx::query("DELETE FROM quest_assignments WHERE quest_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let deleted = sqlx::query("DELETE FROM quests WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound("Quest not found".to_string()));
    }
    tx.commit().await?;

    info!(quest_id = id, assignments, "Quest deleted");
    Ok(StatusCode::NO_CONTENT)
}
