//! Page routes. Each one runs its route guard, then answers with the JSON the
//! page renders from.

use super::{
    assignments::{self, Assignment},
    charities::{self, Charity, DONATION_AMOUNTS},
    community::{self, CommunityFeed},
    current_auth, page_gate,
    points::Balance,
    profile::{self, UserDetails},
    quests::{self, CatalogQuest, Quest},
    submissions::{self, PendingSubmission},
    users, ApiError, Principal,
};
use crate::auth::{admin_only, landing, user_only, AuthService, AuthSnapshot, GuardDecision, Role};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use utoipa::ToSchema;

/// Student home: the quest catalog plus assigned quests.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppPage {
    pub profile: UserDetails,
    pub quests: Vec<CatalogQuest>,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminDashboard {
    pub students: Vec<UserDetails>,
    pub quests: Vec<Quest>,
    pub assignments: Vec<Assignment>,
    pub pending_submissions: Vec<PendingSubmission>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RedeemPage {
    pub balance: Balance,
    pub charities: Vec<Charity>,
    pub donation_amounts: Vec<i64>,
}

/// Run `guard` for the requested page. `Err` carries the redirect or loading
/// response.
async fn enter(
    headers: &HeaderMap,
    uri: &Uri,
    auth: &Arc<AuthService>,
    guard: fn(&AuthSnapshot, &str) -> GuardDecision,
) -> Result<Principal, Response> {
    let (key, snapshot) = current_auth(headers, auth).await;
    let origin = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
    if let Some(response) = page_gate(guard(&snapshot, origin)) {
        return Err(response);
    }
    match (key, snapshot.session, snapshot.role) {
        (Some(key), Some(session), Some(role)) => Ok(Principal { key, session, role }),
        _ => Err(ApiError::not_signed_in().into_response()),
    }
}

fn render<T: Serialize>(view: Result<T, ApiError>) -> Response {
    match view {
        Ok(view) => Json(view).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 303, description = "Forward to the login page or the role's dashboard"),
        (status = 503, description = "Auth state still loading"),
    ),
    tag = "pages"
)]
pub async fn home(headers: HeaderMap, auth: Extension<Arc<AuthService>>) -> Response {
    let (_, snapshot) = current_auth(&headers, &auth).await;
    page_gate(landing(&snapshot)).unwrap_or_else(|| StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    get,
    path = "/app",
    responses(
        (status = 200, description = "Quest catalog and assignments", body = AppPage),
        (status = 303, description = "Not a signed-in student"),
        (status = 404, description = "No profile row"),
        (status = 503, description = "Auth state still loading"),
    ),
    tag = "pages"
)]
pub async fn app_page(
    uri: Uri,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Response {
    let principal = match enter(&headers, &uri, &auth, user_only).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    render(
        async {
            let profile = profile::require_details(&pool, &principal).await?;
            let quests = quests::fetch_catalog(&pool, profile.user_id).await?;
            let assignments = assignments::fetch_for_user(&pool, profile.user_id).await?;
            Ok::<_, ApiError>(AppPage {
                profile,
                quests,
                assignments,
            })
        }
        .await,
    )
}

#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Admin dashboard", body = AdminDashboard),
        (status = 303, description = "Not a signed-in admin"),
        (status = 503, description = "Auth state still loading"),
    ),
    tag = "pages"
)]
pub async fn admin_page(
    uri: Uri,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = enter(&headers, &uri, &auth, admin_only).await {
        return response;
    }
    render(
        async {
            Ok::<_, ApiError>(AdminDashboard {
                students: users::fetch_users(&pool, Some(Role::User)).await?,
                quests: quests::fetch_quests(&pool).await?,
                assignments: assignments::fetch_all(&pool).await?,
                pending_submissions: submissions::fetch_pending(&pool).await?,
            })
        }
        .await,
    )
}

#[utoipa::path(
    get,
    path = "/community",
    responses(
        (status = 200, description = "Community feed", body = CommunityFeed),
        (status = 303, description = "Not a signed-in student"),
        (status = 503, description = "Auth state still loading"),
    ),
    tag = "pages"
)]
pub async fn community_page(
    uri: Uri,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Response {
    let principal = match enter(&headers, &uri, &auth, user_only).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    render(
        community::fetch_feed(&pool, principal.auth_id())
            .await
            .map_err(ApiError::from),
    )
}

#[utoipa::path(
    get,
    path = "/redeem",
    responses(
        (status = 200, description = "Balance and charities", body = RedeemPage),
        (status = 303, description = "Not a signed-in student"),
        (status = 404, description = "No profile row"),
        (status = 503, description = "Auth state still loading"),
    ),
    tag = "pages"
)]
pub async fn redeem_page(
    uri: Uri,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Response {
    let principal = match enter(&headers, &uri, &auth, user_only).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    render(
        async {
            let details = profile::require_details(&pool, &principal).await?;
            Ok::<_, ApiError>(RedeemPage {
                balance: Balance {
                    points: details.points,
                    total_points_earned: details.total_points_earned,
                    total_points_donated: details.total_points_donated,
                    quest_completed: details.quest_completed,
                },
                charities: charities::fetch_charities(&pool).await?,
                donation_amounts: DONATION_AMOUNTS.to_vec(),
            })
        }
        .await,
    )
}

#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Own profile", body = UserDetails),
        (status = 303, description = "Not a signed-in student"),
        (status = 404, description = "No profile row"),
        (status = 503, description = "Auth state still loading"),
    ),
    tag = "pages"
)]
pub async fn profile_page(
    uri: Uri,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Response {
    let principal = match enter(&headers, &uri, &auth, user_only).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    render(profile::require_details(&pool, &principal).await)
}

/// Catch-all for unknown routes.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Page not found." })))
}
