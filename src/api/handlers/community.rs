//! Community feed of approved submissions.

use super::{profile, require, ApiError};
use crate::auth::{user_only, AuthService};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CommunityPost {
    pub id: i64,
    pub user_id: i64,
    pub quest_id: Option<i64>,
    pub post_title: String,
    pub post_caption: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
    pub author_name: Option<String>,
    pub author_username: Option<String>,
    pub quest_title: Option<String>,
    pub quest_points: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommunityFeed {
    pub posts: Vec<CommunityPost>,
    /// The viewer's points, when they have a profile row.
    pub viewer_points: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/community",
    responses(
        (status = 200, description = "Posts, newest first", body = CommunityFeed),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Admins use the dashboard"),
    ),
    tag = "community"
)]
pub async fn feed(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;
    Ok(Json(fetch_feed(&pool, principal.auth_id()).await?))
}

pub(crate) async fn fetch_feed(
    pool: &PgPool,
    viewer: uuid::Uuid,
) -> Result<CommunityFeed, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT
            c.id,
            c.user_id,
            c.quest_id,
            c.post_title,
            c.post_caption,
            c.image_url,
            to_char(c.created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
            u.name AS author_name,
            u.username AS author_username,
            q.title AS quest_title,
            q.points AS quest_points
        FROM community_page c
        LEFT JOIN user_details u ON u.user_id = c.user_id
        LEFT JOIN quests q ON q.id = c.quest_id
        ORDER BY c.created_at DESC, c.id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let posts = rows
        .iter()
        .map(|row| CommunityPost {
            id: row.get("id"),
            user_id: row.get("user_id"),
            quest_id: row.get("quest_id"),
            post_title: row.get("post_title"),
            post_caption: row.get("post_caption"),
            image_url: row.get("image_url"),
            created_at: row.get("created_at"),
            author_name: row.get("author_name"),
            author_username: row.get("author_username"),
            quest_title: row.get("quest_title"),
            quest_points: row.get("quest_points"),
        })
        .collect();

    let viewer_points = profile::fetch_by_auth_id(pool, viewer)
        .await?
        .map(|details| details.points);

    Ok(CommunityFeed {
        posts,
        viewer_points,
    })
}
