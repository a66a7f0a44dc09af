use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

impl Health {
    fn new(database_ok: bool) -> Self {
        Self {
            commit: GIT_COMMIT_HASH.to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: if database_ok { "ok" } else { "error" }.to_string(),
        }
    }

    /// `name:version:short_hash`, sent as `X-App`.
    fn app_header(&self) -> String {
        let short_hash = self.commit.get(0..7).unwrap_or("");
        format!("{}:{}:{}", self.name, self.version, short_hash)
    }
}

async fn ping_database(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    match pool.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => true,
                Err(error) => {
                    error!("Failed to ping database: {}", error);
                    false
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            false
        }
    }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database is reachable", body = Health),
        (status = 503, description = "Database is unreachable", body = Health)
    ),
    tag= "health"
)]
pub async fn health(method: Method, pool: Extension<PgPool>) -> impl IntoResponse {
    let database_ok = ping_database(&pool).await;
    let health = Health::new(database_ok);

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let mut headers = HeaderMap::new();
    match health.app_header().parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    if database_ok {
        debug!("Database connection is healthy");
        (StatusCode::OK, headers, body)
    } else {
        debug!("Database connection is unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::testing::TestApp;
    use axum::{body::to_bytes, http::Request};
    use tower::ServiceExt;

    #[test]
    fn app_header_uses_short_hash() {
        let mut health = Health::new(true);
        health.commit = "0123456789abcdef".to_string();
        assert_eq!(
            health.app_header(),
            format!("greenquest:{}:0123456", env!("CARGO_PKG_VERSION"))
        );
        health.commit = "abc".to_string();
        assert!(health.app_header().ends_with(':'));
    }

    #[tokio::test]
    async fn unreachable_database_is_unhealthy() -> anyhow::Result<()> {
        let app = TestApp::new();
        let response = app.router().oneshot(app.get("/health", None)?).await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get("X-App").is_some());
        let body: serde_json::Value = app.json(response).await?;
        assert_eq!(body["database"], "error");
        assert_eq!(body["name"], "greenquest");
        Ok(())
    }

    #[tokio::test]
    async fn head_has_no_body() -> anyhow::Result<()> {
        let app = TestApp::new();
        let response = app
            .router()
            .oneshot(Request::head("/health").body(axum::body::Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }
}
