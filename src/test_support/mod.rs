//! Postgres fixtures for tests that exercise real SQL.
//!
//! One container is shared by every test in the binary. Tests take
//! [`database`], which serializes them on a global lock, applies
//! `sql/schema.sql` and truncates every table.

pub(crate) mod postgres;
pub(crate) mod runtime;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use uuid::Uuid;

use postgres::PostgresContainer;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

static CONTAINER: OnceCell<PostgresContainer> = OnceCell::const_new();
static DB_LOCK: Mutex<()> = Mutex::const_new(());

pub(crate) struct TestDb {
    pub(crate) pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// A clean database, or `None` when no container runtime is available.
pub(crate) async fn database() -> Result<Option<TestDb>> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping database test: {err}");
        return Ok(None);
    }
    let guard = DB_LOCK.lock().await;

    let container = CONTAINER
        .get_or_try_init(|| async {
            let postgres = PostgresContainer::start().await?;
            postgres.wait_until_ready().await?;
            Ok::<PostgresContainer, anyhow::Error>(postgres)
        })
        .await?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&container.dsn())
        .await
        .context("failed to connect to test database")?;

    sqlx::Executor::execute(&pool, SCHEMA_SQL)
        .await
        .context("failed to apply schema")?;
    sqlx::query(
        r"
        TRUNCATE donations, charities, community_page, quest_submissions,
                 quest_assignments, quests, user_details
        RESTART IDENTITY CASCADE
        ",
    )
    .execute(&pool)
    .await
    .context("failed to truncate tables")?;

    Ok(Some(TestDb {
        pool,
        _guard: guard,
    }))
}

/// Insert a `user_details` row and return its `user_id`.
pub(crate) async fn insert_user(pool: &PgPool, auth_id: Uuid, role: &str, points: i64) -> Result<i64> {
    let row = sqlx::query(
        r"
        INSERT INTO user_details (auth_id, name, username, role, points, total_points_earned)
        VALUES ($1, 'Test Student', 'tester', $2, $3, $3)
        RETURNING user_id
        ",
    )
    .bind(auth_id)
    .bind(role)
    .bind(points)
    .fetch_one(pool)
    .await
    .context("failed to insert user")?;
    Ok(row.get("user_id"))
}

pub(crate) async fn insert_quest(pool: &PgPool, title: &str, points: i64) -> Result<i64> {
    let row = sqlx::query("INSERT INTO quests (title, points) VALUES ($1, $2) RETURNING id")
        .bind(title)
        .bind(points)
        .fetch_one(pool)
        .await
        .context("failed to insert quest")?;
    Ok(row.get("id"))
}

pub(crate) async fn insert_charity(pool: &PgPool, name: &str, min_donation: i64) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO charities (name, min_donation) VALUES ($1, $2) RETURNING id",
    )
    .bind(name)
    .bind(min_donation)
    .fetch_one(pool)
    .await
    .context("failed to insert charity")?;
    Ok(row.get("id"))
}

/// Current `(points, quest_completed)` for a user.
pub(crate) async fn balance(pool: &PgPool, user_id: i64) -> Result<(i64, i64)> {
    let row = sqlx::query("SELECT points, quest_completed FROM user_details WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("failed to read balance")?;
    Ok((row.get("points"), row.get("quest_completed")))
}

pub(crate) async fn count(pool: &PgPool, table: &str) -> Result<i64> {
    let query = format!("SELECT COUNT(*) AS n FROM {table}");
    let row = sqlx::query(&query).fetch_one(pool).await?;
    Ok(row.get("n"))
}
