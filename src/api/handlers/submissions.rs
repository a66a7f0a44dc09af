//! Quest submissions: students send proof, admins review it.
//!
//! Flow Overview:
//! 1) A student submits a title, optional caption and optional image.
//! 2) The image goes to object storage under `<auth_id>/<unix_millis>.<ext>`.
//! 3) The submission waits as `pending` until an admin approves or rejects it.
//! 4) Approval awards the quest's points and publishes a community post.

use super::{points, profile, require, ApiError, Principal};
use crate::{
    auth::{admin_only, user_only, AuthService},
    storage::{object_path, ImageUpload, ObjectStorage, MAX_IMAGE_BYTES},
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{info, instrument};
use utoipa::ToSchema;

const SUBMISSION_COLUMNS: &str = r#"
    s.id,
    s.user_id,
    s.quest_id,
    s.post_title,
    s.post_caption,
    s.image_url,
    s.status,
    to_char(s.submitted_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS submitted_at,
    to_char(s.reviewed_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS reviewed_at
"#;

/// Request body limit for `POST /v1/submissions`: a base64 image at the upload
/// limit plus room for the JSON around it.
pub const SUBMISSION_BODY_LIMIT: usize = MAX_IMAGE_BYTES.div_ceil(3) * 4 + 64 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub quest_id: i64,
    pub post_title: String,
    pub post_caption: Option<String>,
    pub image_url: Option<String>,
    pub status: String,
    pub submitted_at: String,
    pub reviewed_at: Option<String>,
}

impl Submission {
    fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            quest_id: row.get("quest_id"),
            post_title: row.get("post_title"),
            post_caption: row.get("post_caption"),
            image_url: row.get("image_url"),
            status: row.get("status"),
            submitted_at: row.get("submitted_at"),
            reviewed_at: row.get("reviewed_at"),
        }
    }
}

/// A pending submission with the context a reviewer needs.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PendingSubmission {
    #[serde(flatten)]
    pub submission: Submission,
    pub student_name: Option<String>,
    pub student_username: Option<String>,
    pub quest_title: String,
    pub quest_points: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ImagePayload {
    pub file_name: String,
    pub content_type: String,
    /// Base64 (standard alphabet) file content.
    pub data: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    pub quest_id: i64,
    #[serde(default)]
    pub post_title: Option<String>,
    #[serde(default)]
    pub post_caption: Option<String>,
    #[serde(default)]
    pub image: Option<ImagePayload>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewResponse {
    pub id: i64,
    pub status: String,
    pub message: String,
    pub balance: Option<points::Balance>,
}

#[utoipa::path(
    post,
    path = "/v1/submissions",
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "Submitted for approval", body = Submission),
        (status = 400, description = "Invalid input or image"),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "Quest not found"),
        (status = 409, description = "A pending or approved submission already exists"),
        (status = 502, description = "Image upload failed"),
    ),
    tag = "submissions"
)]
pub async fn submit(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    storage: Extension<Arc<ObjectStorage>>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;

    // Decode before touching anything remote so bad payloads fail fast.
    let image = payload.image.map(decode_image).transpose()?;
    let details = profile::require_details(&pool, &principal).await?;

    let quest_title = sqlx::query_scalar::<_, String>("SELECT title FROM quests WHERE id = $1")
        .bind(payload.quest_id)
        .fetch_optional(&*pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Quest not found".to_string()))?;

    let open = sqlx::query(
        r"
        SELECT 1 FROM quest_submissions
        WHERE user_id = $1 AND quest_id = $2 AND status IN ('pending', 'approved')
        LIMIT 1
        ",
    )
    .bind(details.user_id)
    .bind(payload.quest_id)
    .fetch_optional(&*pool)
    .await?;
    if open.is_some() {
        return Err(already_submitted());
    }

    let image_url = match image {
        Some(image) => Some(upload_image(&storage, &principal, image).await?),
        None => None,
    };

    let post_title = super::normalize_optional(payload.post_title)
        .unwrap_or_else(|| format!("Completed: {quest_title}"));
    let query = format!(
        r"
        WITH s AS (
            INSERT INTO quest_submissions (user_id, quest_id, post_title, post_caption, image_url, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
        )
        SELECT {SUBMISSION_COLUMNS} FROM s
        "
    );
    let row = sqlx::query(&query)
        .bind(details.user_id)
        .bind(payload.quest_id)
        .bind(&post_title)
        .bind(super::normalize_optional(payload.post_caption))
        .bind(image_url)
        .fetch_one(&*pool)
        .await
        .map_err(|err| {
            if err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                already_submitted()
            } else {
                ApiError::Database(err)
            }
        })?;

    let submission = Submission::from_row(&row);
    info!(submission_id = submission.id, quest_id = submission.quest_id, "Quest submitted");
    Ok((StatusCode::CREATED, Json(submission)))
}

fn already_submitted() -> ApiError {
    ApiError::Conflict("You already have a pending or approved submission for this quest".to_string())
}

fn decode_image(payload: ImagePayload) -> Result<ImageUpload, ApiError> {
    let bytes = Base64::decode_vec(payload.data.trim())
        .map_err(|_| ApiError::BadRequest("Image data is not valid base64".to_string()))?;
    let image = ImageUpload {
        file_name: payload.file_name,
        content_type: payload.content_type,
        bytes,
    };
    image.validate()?;
    Ok(image)
}

#[instrument(skip_all, fields(auth_id = %principal.auth_id()))]
async fn upload_image(
    storage: &ObjectStorage,
    principal: &Principal,
    image: ImageUpload,
) -> Result<String, ApiError> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let path = object_path(principal.auth_id(), millis, &image.extension());
    let url = storage
        .upload(&principal.session.access_token, &path, image)
        .await?;
    Ok(url.to_string())
}

#[utoipa::path(
    get,
    path = "/v1/submissions",
    responses(
        (status = 200, description = "The caller's submissions, newest first", body = [Submission]),
        (status = 401, description = "Not signed in"),
    ),
    tag = "submissions"
)]
pub async fn my_submissions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;
    let details = profile::require_details(&pool, &principal).await?;

    let query = format!(
        "SELECT {SUBMISSION_COLUMNS} FROM quest_submissions s WHERE s.user_id = $1 ORDER BY s.submitted_at DESC"
    );
    let rows = sqlx::query(&query)
        .bind(details.user_id)
        .fetch_all(&*pool)
        .await?;
    Ok(Json(rows.iter().map(Submission::from_row).collect::<Vec<_>>()))
}

#[utoipa::path(
    get,
    path = "/v1/admin/submissions",
    responses(
        (status = 200, description = "Pending submissions, oldest first", body = [PendingSubmission]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
    ),
    tag = "admin"
)]
pub async fn pending_submissions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, admin_only).await?;
    Ok(Json(fetch_pending(&pool).await?))
}

pub(crate) async fn fetch_pending(pool: &PgPool) -> Result<Vec<PendingSubmission>, sqlx::Error> {
    let query = format!(
        r"
        SELECT
            {SUBMISSION_COLUMNS},
            u.name AS student_name,
            u.username AS student_username,
            q.title AS quest_title,
            q.points AS quest_points
        FROM quest_submissions s
        JOIN quests q ON q.id = s.quest_id
        LEFT JOIN user_details u ON u.user_id = s.user_id
        WHERE s.status = 'pending'
        ORDER BY s.submitted_at ASC
        "
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| PendingSubmission {
            submission: Submission::from_row(row),
            student_name: row.get("student_name"),
            student_username: row.get("student_username"),
            quest_title: row.get("quest_title"),
            quest_points: row.get("quest_points"),
        })
        .collect())
}

#[utoipa::path(
    post,
    path = "/v1/admin/submissions/{id}/approve",
    params(("id" = i64, Path, description = "Submission id")),
    responses(
        (status = 200, description = "Approved, points awarded and post published", body = ReviewResponse),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Submission not found"),
        (status = 409, description = "Submission was already reviewed"),
    ),
    tag = "admin"
)]
pub async fn approve(
    Path(id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, admin_only).await?;
    let reviewer = profile::fetch_by_auth_id(&pool, principal.auth_id())
        .await?
        .map(|details| details.user_id);

    let mut tx = pool.begin().await?;
    // Conditional on `pending`, so a second approval awards nothing.
    let row = sqlx::query(
        r"
        UPDATE quest_submissions s
        SET status = 'approved', reviewed_at = NOW(), reviewed_by = $2
        FROM quests q
        WHERE s.id = $1 AND s.status = 'pending' AND q.id = s.quest_id
        RETURNING s.user_id, s.quest_id, s.post_title, s.post_caption, s.image_url, q.points
        ",
    )
    .bind(id)
    .bind(reviewer)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Err(not_pending(&pool, id).await);
    };

    let user_id: i64 = row.get("user_id");
    let quest_points: i64 = row.get("points");
    let balance = points::award(&mut tx, user_id, quest_points).await?;

    sqlx::query(
        r"
        INSERT INTO community_page (user_id, quest_id, submission_id, post_title, post_caption, image_url)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(user_id)
    .bind(row.get::<i64, _>("quest_id"))
    .bind(id)
    .bind(row.get::<String, _>("post_title"))
    .bind(row.get::<Option<String>, _>("post_caption"))
    .bind(row.get::<Option<String>, _>("image_url"))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(submission_id = id, user_id, points = quest_points, "Submission approved");
    Ok(Json(ReviewResponse {
        id,
        status: "approved".to_string(),
        message: "Quest approved and points awarded!".to_string(),
        balance,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/submissions/{id}/reject",
    params(("id" = i64, Path, description = "Submission id")),
    responses(
        (status = 200, description = "Rejected; the student may submit again", body = ReviewResponse),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Submission not found"),
        (status = 409, description = "Submission was already reviewed"),
    ),
    tag = "admin"
)]
pub async fn reject(
    Path(id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, admin_only).await?;
    let reviewer = profile::fetch_by_auth_id(&pool, principal.auth_id())
        .await?
        .map(|details| details.user_id);

    let updated = sqlx::query(
        r"
        UPDATE quest_submissions
        SET status = 'rejected', reviewed_at = NOW(), reviewed_by = $2
        WHERE id = $1 AND status = 'pending'
        ",
    )
    .bind(id)
    .bind(reviewer)
    .execute(&*pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(not_pending(&pool, id).await);
    }

    info!(submission_id = id, "Submission rejected");
    Ok(Json(ReviewResponse {
        id,
        status: "rejected".to_string(),
        message: "Submission rejected".to_string(),
        balance: None,
    }))
}

/// Explain why a review found nothing to update.
async fn not_pending(pool: &PgPool, id: i64) -> ApiError {
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM quest_submissions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await;
    match status {
        Ok(Some(status)) => ApiError::Conflict(format!("Submission was already {status}")),
        Ok(None) => ApiError::NotFound("Submission not found".to_string()),
        Err(err) => ApiError::Database(err),
    }
}
