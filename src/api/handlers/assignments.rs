//! Quest assignments.
//!
//! Status flow: `assigned` | `in_progress` → `completed` (student submits for
//! approval) → `approved` | `rejected` (admin review). Approval stamps
//! `completed_at` and awards the quest's points in the same transaction.

use super::{points, profile, require, ApiError};
use crate::auth::{admin_only, user_only, AuthService};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::{fmt, sync::Arc};
use tracing::info;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Completed,
    Approved,
    Rejected,
}

impl AssignmentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Statuses a student may mark `completed` from.
    #[must_use]
    pub const fn student_can_complete(self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }

    /// Whether an admin may move an assignment from `self` to `next`.
    #[must_use]
    pub const fn admin_can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Completed, Self::Approved | Self::Rejected)
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignmentQuest {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub points: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Assignment {
    pub id: i64,
    pub quest_id: i64,
    pub user_id: i64,
    pub assigned_by: Option<i64>,
    pub status: String,
    pub assigned_at: String,
    pub completed_at: Option<String>,
    pub quest: Option<AssignmentQuest>,
}

const ASSIGNMENT_SELECT: &str = r#"
    SELECT
        a.id,
        a.quest_id,
        a.user_id,
        a.assigned_by,
        a.status,
        to_char(a.assigned_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS assigned_at,
        to_char(a.completed_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS completed_at,
        q.title AS quest_title,
        q.description AS quest_description,
        q.points AS quest_points
    FROM quest_assignments a
    LEFT JOIN quests q ON q.id = a.quest_id
"#;

impl Assignment {
    fn from_row(row: &PgRow) -> Self {
        let quest_id: i64 = row.get("quest_id");
        let title: Option<String> = row.get("quest_title");
        let quest = title.map(|title| AssignmentQuest {
            id: quest_id,
            title,
            description: row.get("quest_description"),
            points: row.get::<Option<i64>, _>("quest_points").unwrap_or_default(),
        });
        Self {
            id: row.get("id"),
            quest_id,
            user_id: row.get("user_id"),
            assigned_by: row.get("assigned_by"),
            status: row.get("status"),
            assigned_at: row.get("assigned_at"),
            completed_at: row.get("completed_at"),
            quest,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AssignRequest {
    pub quest_id: Option<i64>,
    #[serde(default)]
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignResponse {
    pub assigned: usize,
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct StatusRequest {
    pub status: AssignmentStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub id: i64,
    pub status: AssignmentStatus,
    pub message: String,
    /// New balance of the student when points were awarded.
    pub balance: Option<points::Balance>,
}

#[utoipa::path(
    get,
    path = "/v1/assignments",
    responses(
        (status = 200, description = "The caller's assignments, newest first", body = [Assignment]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Students only"),
    ),
    tag = "assignments"
)]
pub async fn my_assignments(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;
    let details = profile::require_details(&pool, &principal).await?;
    Ok(Json(fetch_for_user(&pool, details.user_id).await?))
}

pub(crate) async fn fetch_for_user(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<Assignment>, sqlx::Error> {
    let query = format!("{ASSIGNMENT_SELECT} WHERE a.user_id = $1 ORDER BY a.assigned_at DESC");
    let rows = sqlx::query(&query).bind(user_id).fetch_all(pool).await?;
    Ok(rows.iter().map(Assignment::from_row).collect())
}

pub(crate) async fn fetch_all(pool: &PgPool) -> Result<Vec<Assignment>, sqlx::Error> {
    let query = format!("{ASSIGNMENT_SELECT} ORDER BY a.assigned_at DESC");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(Assignment::from_row).collect())
}

#[utoipa::path(
    post,
    path = "/v1/assignments/{id}/complete",
    params(("id" = i64, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Submitted for approval", body = StatusResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "Assignment not found"),
        (status = 409, description = "Assignment is not open"),
    ),
    tag = "assignments"
)]
pub async fn complete_assignment(
    Path(id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;
    let details = profile::require_details(&pool, &principal).await?;

    let updated = sqlx::query(
        r"
        UPDATE quest_assignments
        SET status = 'completed'
        WHERE id = $1 AND user_id = $2 AND status IN ('assigned', 'in_progress')
        ",
    )
    .bind(id)
    .bind(details.user_id)
    .execute(&*pool)
    .await?
    .rows_affected();

    if updated == 0 {
        let current = current_status(&pool, id, Some(details.user_id)).await?;
        return Err(match current {
            None => ApiError::NotFound("Assignment not found".to_string()),
            Some(status) => ApiError::Conflict(format!("Assignment is already {status}")),
        });
    }

    info!(assignment_id = id, "Assignment submitted for approval");
    Ok(Json(StatusResponse {
        id,
        status: AssignmentStatus::Completed,
        message: "Quest submitted for approval!".to_string(),
        balance: None,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/admin/assignments",
    responses(
        (status = 200, description = "All assignments, newest first", body = [Assignment]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
    ),
    tag = "admin"
)]
pub async fn list_assignments(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;
    Ok(Json(fetch_all(&pool).await?))
}

#[utoipa::path(
    post,
    path = "/v1/admin/assignments",
    request_body = AssignRequest,
    responses(
        (status = 201, description = "Quest assigned", body = AssignResponse),
        (status = 400, description = "No quest or no students selected"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Quest not found"),
    ),
    tag = "admin"
)]
pub async fn assign_quest(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    Json(payload): Json<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, admin_only).await?;

    let mut user_ids = payload.user_ids;
    user_ids.sort_unstable();
    user_ids.dedup();
    let Some(quest_id) = payload.quest_id.filter(|_| !user_ids.is_empty()) else {
        return Err(ApiError::BadRequest(
            "Select a quest and at least one student.".to_string(),
        ));
    };

    let assigned_by = profile::fetch_by_auth_id(&pool, principal.auth_id())
        .await?
        .map(|details| details.user_id);

    let mut tx = pool.begin().await?;
    let quest = sqlx::query("SELECT 1 FROM quests WHERE id = $1")
        .bind(quest_id)
        .fetch_optional(&mut *tx)
        .await?;
    if quest.is_none() {
        return Err(ApiError::NotFound("Quest not found".to_string()));
    }

    let assigned = sqlx::query(
        r"
        INSERT INTO quest_assignments (quest_id, user_id, assigned_by, status)
        SELECT $1, student, $3, 'assigned'
        FROM unnest($2::bigint[]) AS student
        ",
    )
    .bind(quest_id)
    .bind(&user_ids)
    .bind(assigned_by)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    info!(quest_id, assigned, "Quest assigned");
    let assigned = usize::try_from(assigned).unwrap_or(user_ids.len());
    Ok((
        StatusCode::CREATED,
        Json(AssignResponse {
            assigned,
            message: format!("Quest assigned to {assigned} student(s)!"),
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/v1/admin/assignments/{id}/status",
    params(("id" = i64, Path, description = "Assignment id")),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Assignment reviewed", body = StatusResponse),
        (status = 400, description = "Only approve or reject are allowed"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Assignment not found"),
        (status = 409, description = "Assignment is not awaiting approval"),
    ),
    tag = "admin"
)]
pub async fn update_status(
    Path(id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    Json(payload): Json<StatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;

    let next = payload.status;
    if !AssignmentStatus::Completed.admin_can_move_to(next) {
        return Err(ApiError::BadRequest(
            "Status must be approved or rejected.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        r"
        UPDATE quest_assignments a
        SET
            status = $2,
            completed_at = CASE WHEN $2 = 'approved' THEN NOW() ELSE a.completed_at END
        FROM quests q
        WHERE a.id = $1 AND a.status = 'completed' AND q.id = a.quest_id
        RETURNING a.user_id, q.points
        ",
    )
    .bind(id)
    .bind(next.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        let current = current_status(&pool, id, None).await?;
        return Err(match current {
            None => ApiError::NotFound("Assignment not found".to_string()),
            Some(status) => ApiError::Conflict(format!(
                "Assignment is {status}, not awaiting approval"
            )),
        });
    };

    let balance = if next == AssignmentStatus::Approved {
        let user_id: i64 = row.get("user_id");
        let quest_points: i64 = row.get("points");
        points::award(&mut tx, user_id, quest_points).await?
    } else {
        None
    };
    tx.commit().await?;

    let message = if next == AssignmentStatus::Approved {
        "Quest approved and points awarded!".to_string()
    } else {
        format!("Assignment {next}!")
    };
    info!(assignment_id = id, status = %next, "Assignment reviewed");
    Ok(Json(StatusResponse {
        id,
        status: next,
        message,
        balance,
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/assignments/{id}",
    params(("id" = i64, Path, description = "Assignment id")),
    responses(
        (status = 204, description = "Assignment deleted"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Assignment not found"),
    ),
    tag = "admin"
)]
pub async fn delete_assignment(
    Path(id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;
    let deleted = sqlx::query("DELETE FROM quest_assignments WHERE id = $1")
        .bind(id)
        .execute(&*pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound("Assignment not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn current_status(
    pool: &PgPool,
    id: i64,
    user_id: Option<i64>,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT status FROM quest_assignments WHERE id = $1 AND ($2::bigint IS NULL OR user_id = $2)",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::handlers::testing::TestApp,
        test_support::{self, balance},
    };
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use serde_json::json;
    use tower::ServiceExt;
    use uuid::Uuid;

    const ALL: [AssignmentStatus; 5] = [
        AssignmentStatus::Assigned,
        AssignmentStatus::InProgress,
        AssignmentStatus::Completed,
        AssignmentStatus::Approved,
        AssignmentStatus::Rejected,
    ];

    #[test]
    fn students_complete_only_open_assignments() {
        let open: Vec<_> = ALL
            .into_iter()
            .filter(|status| status.student_can_complete())
            .collect();
        assert_eq!(
            open,
            vec![AssignmentStatus::Assigned, AssignmentStatus::InProgress]
        );
    }

    #[test]
    fn admins_review_only_completed_assignments() {
        for from in ALL {
            for to in ALL {
                let allowed = from == AssignmentStatus::Completed
                    && matches!(to, AssignmentStatus::Approved | AssignmentStatus::Rejected);
                assert_eq!(from.admin_can_move_to(to), allowed, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_serializes_snake_case() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_string(&AssignmentStatus::InProgress)?,
            "\"in_progress\""
        );
        Ok(())
    }

    fn admin_post(key: &str, body: &str) -> anyhow::Result<Request<Body>> {
        Ok(Request::post("/v1/admin/assignments")
            .header("authorization", format!("Bearer {key}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?)
    }

    #[tokio::test]
    async fn assigning_needs_quest_and_students() -> anyhow::Result<()> {
        let app = TestApp::new();
        let key = app.signed_in(Uuid::new_v4(), "boss@example.com", Some("admin"));

        for body in [r#"{"user_ids": [1]}"#, r#"{"quest_id": 3, "user_ids": []}"#] {
            let response = app.router().oneshot(admin_post(key.as_str(), body)?).await?;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let error: serde_json::Value = app.json(response).await?;
            assert_eq!(error["error"], "Select a quest and at least one student.");
        }
        Ok(())
    }

    #[tokio::test]
    async fn review_rejects_non_review_statuses() -> anyhow::Result<()> {
        let app = TestApp::new();
        let key = app.signed_in(Uuid::new_v4(), "boss@example.com", Some("admin"));
        let response = app
            .router()
            .oneshot(
                Request::put("/v1/admin/assignments/7/status")
                    .header("authorization", format!("Bearer {}", key.as_str()))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"status": "assigned"}"#))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn approving_completed_assignment_awards_once() -> anyhow::Result<()> {
        let Some(db) = test_support::database().await? else {
            return Ok(());
        };
        let user_id = test_support::insert_user(&db.pool, Uuid::new_v4(), "user", 120).await?;
        let quest_id = test_support::insert_quest(&db.pool, "Bike to school", 50).await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO quest_assignments (quest_id, user_id, status) VALUES ($1, $2, 'completed') RETURNING id",
        )
        .bind(quest_id)
        .bind(user_id)
        .fetch_one(&db.pool)
        .await?;

        let app = TestApp::with_pool(db.pool.clone());
        let key = app.signed_in(Uuid::new_v4(), "boss@example.com", Some("admin"));
        let path = format!("/v1/admin/assignments/{id}/status");
        let approve = || app.send(Method::PUT, &path, &key, Some(json!({ "status": "approved" })));

        let response = app.router().oneshot(approve()?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: StatusResponse = app.json(response).await?;
        assert_eq!(body.balance.map(|b| b.points), Some(170));

        let response = app.router().oneshot(approve()?).await?;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let error: serde_json::Value = app.json(response).await?;
        assert_eq!(error["error"], "Assignment is approved, not awaiting approval");

        assert_eq!(balance(&db.pool, user_id).await?, (170, 1));
        Ok(())
    }
}
