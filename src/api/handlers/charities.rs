//! Charities and point donations.

use super::{points, profile, require, ApiError};
use crate::auth::{user_only, AuthService};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

/// Amounts offered by the redeem page.
pub const DONATION_AMOUNTS: [i64; 4] = [50, 100, 200, 500];

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Charity {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub min_donation: i64,
    pub total_points_received: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DonationRequest {
    pub charity_id: i64,
    pub points: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DonationResponse {
    pub donation_id: i64,
    pub charity_id: i64,
    pub points_donated: i64,
    pub message: String,
    pub balance: points::Balance,
}

/// Checks a donation against the donor's balance and the charity minimum.
///
/// Balance comes first so a donor who cannot afford any amount hears that
/// before the minimum.
pub(crate) fn check_donation(
    charity: &Charity,
    balance: i64,
    amount: i64,
) -> Result<(), ApiError> {
    if amount <= 0 {
        return Err(not_positive());
    }
    if balance < amount {
        return Err(insufficient());
    }
    if amount < charity.min_donation {
        return Err(ApiError::BadRequest(format!(
            "Minimum donation for {} is {} points",
            charity.name, charity.min_donation
        )));
    }
    Ok(())
}

fn not_positive() -> ApiError {
    ApiError::BadRequest("Donation must be a positive number of points.".to_string())
}

fn insufficient() -> ApiError {
    ApiError::BadRequest("Insufficient points!".to_string())
}

#[utoipa::path(
    get,
    path = "/v1/charities",
    responses(
        (status = 200, description = "Charities ordered by id", body = [Charity]),
        (status = 401, description = "Not signed in"),
    ),
    tag = "redeem"
)]
pub async fn list_charities(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    require(&headers, &auth, user_only).await?;
    Ok(Json(fetch_charities(&pool).await?))
}

const CHARITY_COLUMNS: &str = "id, name, description, min_donation, total_points_received";

fn charity_from_row(row: &PgRow) -> Charity {
    Charity {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        min_donation: row.get("min_donation"),
        total_points_received: row.get("total_points_received"),
    }
}

pub(crate) async fn fetch_charities(pool: &PgPool) -> Result<Vec<Charity>, sqlx::Error> {
    let query = format!("SELECT {CHARITY_COLUMNS} FROM charities ORDER BY id ASC");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(charity_from_row).collect())
}

async fn fetch_charity(pool: &PgPool, id: i64) -> Result<Option<Charity>, sqlx::Error> {
    let query = format!("SELECT {CHARITY_COLUMNS} FROM charities WHERE id = $1");
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    Ok(row.as_ref().map(charity_from_row))
}

#[utoipa::path(
    post,
    path = "/v1/donations",
    request_body = DonationRequest,
    responses(
        (status = 201, description = "Donation recorded", body = DonationResponse),
        (status = 400, description = "Invalid amount, below minimum, or insufficient points"),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "Charity or profile not found"),
    ),
    tag = "redeem"
)]
pub async fn donate(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth: Extension<Arc<AuthService>>,
    Json(request): Json<DonationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require(&headers, &auth, user_only).await?;
    if request.points <= 0 {
        return Err(not_positive());
    }

    let details = profile::require_details(&pool, &principal).await?;
    let charity = fetch_charity(&pool, request.charity_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Charity not found".to_string()))?;
    check_donation(&charity, details.points, request.points)?;

    let mut tx = pool.begin().await?;
    // The balance read above may be stale; the conditional debit is authoritative.
    let balance = points::debit(&mut tx, details.user_id, request.points)
        .await?
        .ok_or_else(insufficient)?;

    let donation_id: i64 = sqlx::query(
        "INSERT INTO donations (user_id, charity_id, points_donated) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(details.user_id)
    .bind(charity.id)
    .bind(request.points)
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    sqlx::query(
        "UPDATE charities SET total_points_received = total_points_received + $1 WHERE id = $2",
    )
    .bind(request.points)
    .bind(charity.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        donation_id,
        user_id = details.user_id,
        charity_id = charity.id,
        points = request.points,
        "Donation recorded"
    );
    Ok((
        StatusCode::CREATED,
        Json(DonationResponse {
            donation_id,
            charity_id: charity.id,
            points_donated: request.points,
            message: format!(
                "Thank you for donating {} points to {}! 🌱",
                request.points, charity.name
            ),
            balance,
        }),
    ))
}
