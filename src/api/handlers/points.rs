//! Point balance updates.
//!
//! Every balance change is a single `UPDATE .. SET col = col + $n` statement,
//! run on the caller's transaction, so concurrent awards and donations never
//! overwrite each other.

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Row};
use tracing::debug;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Balance {
    pub points: i64,
    pub total_points_earned: i64,
    pub total_points_donated: i64,
    pub quest_completed: i64,
}

const BALANCE_COLUMNS: &str = "points, total_points_earned, total_points_donated, quest_completed";

fn balance_from_row(row: &sqlx::postgres::PgRow) -> Balance {
    Balance {
        points: row.get("points"),
        total_points_earned: row.get("total_points_earned"),
        total_points_donated: row.get("total_points_donated"),
        quest_completed: row.get("quest_completed"),
    }
}

/// Credit a completed quest. Returns `None` if the user row does not exist.
pub(crate) async fn award(
    conn: &mut PgConnection,
    user_id: i64,
    points: i64,
) -> Result<Option<Balance>, sqlx::Error> {
    let query = format!(
        r"
        UPDATE user_details
        SET
            points = points + $1,
            total_points_earned = total_points_earned + $1,
            quest_completed = quest_completed + 1
        WHERE user_id = $2
        RETURNING {BALANCE_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(points)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    debug!(user_id, points, "points awarded");
    Ok(row.as_ref().map(balance_from_row))
}

/// Debit a donation. Returns `None` when the balance is insufficient.
pub(crate) async fn debit(
    conn: &mut PgConnection,
    user_id: i64,
    points: i64,
) -> Result<Option<Balance>, sqlx::Error> {
    let query = format!(
        r"
        UPDATE user_details
        SET
            points = points - $1,
            total_points_donated = total_points_donated + $1
        WHERE user_id = $2 AND points >= $1
        RETURNING {BALANCE_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(points)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(balance_from_row))
}
