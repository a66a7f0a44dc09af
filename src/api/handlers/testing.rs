//! Router harness for handler tests: fake identity and roles, a pool that
//! never connects unless a test database is supplied, and a storage client
//! pointed at an unroutable address.

use super::auth::AuthConfig;
use crate::{
    api,
    auth::{role::StaticRoles, AuthService, RoleResolver},
    identity::{testing::StaticIdentity, SessionKey},
    storage::ObjectStorage,
};
use axum::{
    body::{to_bytes, Body},
    http::{header::LOCATION, Method, Request},
    response::Response,
    Router,
};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use url::Url;
use uuid::Uuid;

const TEST_DSN: &str = "postgres://postgres@127.0.0.1:1/greenquest";
const TEST_BACKEND: &str = "http://127.0.0.1:1/";
const TEST_FRONTEND: &str = "http://localhost:5173";

pub(crate) struct TestApp {
    pub(crate) identity: Arc<StaticIdentity>,
    pub(crate) auth: Arc<AuthService>,
    pool: PgPool,
    storage: Arc<ObjectStorage>,
    config: AuthConfig,
}

impl TestApp {
    pub(crate) fn new() -> Self {
        Self::with_roles([])
    }

    /// Roles stored in `user_details`, consulted when a token has no claim.
    pub(crate) fn with_roles(roles: impl IntoIterator<Item = (Uuid, &'static str)>) -> Self {
        // Lazy and short-fused: handlers that reach the database fail fast.
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(250))
            .connect_lazy(TEST_DSN)
            .unwrap_or_else(|err| panic!("lazy pool: {err}"));
        Self::build(pool, roles)
    }

    /// Handlers run against a real database; roles come from token claims.
    pub(crate) fn with_pool(pool: PgPool) -> Self {
        Self::build(pool, [])
    }

    fn build(pool: PgPool, roles: impl IntoIterator<Item = (Uuid, &'static str)>) -> Self {
        let identity = Arc::new(StaticIdentity::new());
        let resolver = RoleResolver::new(Arc::new(StaticRoles::new(roles)));
        let auth = Arc::new(AuthService::new(
            identity.clone(),
            resolver,
            Duration::from_millis(500),
        ));
        auth.start();

        let backend = Url::parse(TEST_BACKEND).unwrap_or_else(|err| panic!("backend url: {err}"));
        let storage = ObjectStorage::new(
            &backend,
            SecretString::from("anon".to_string()),
            "quest-images".to_string(),
        )
        .unwrap_or_else(|err| panic!("storage client: {err}"));

        Self {
            identity,
            auth,
            pool,
            storage: Arc::new(storage),
            config: AuthConfig::new(TEST_FRONTEND.to_string()),
        }
    }

    pub(crate) fn router(&self) -> Router {
        api::app(
            self.pool.clone(),
            self.auth.clone(),
            self.storage.clone(),
            self.config.clone(),
        )
    }

    /// Sign a user in without going through the password flow.
    pub(crate) fn signed_in(&self, id: Uuid, email: &str, token_role: Option<&str>) -> SessionKey {
        self.identity
            .insert(StaticIdentity::session(id, email, token_role))
    }

    pub(crate) fn get(&self, path: &str, key: Option<&SessionKey>) -> anyhow::Result<Request<Body>> {
        let mut request = Request::get(path);
        if let Some(key) = key {
            request = request.header("authorization", format!("Bearer {}", key.as_str()));
        }
        Ok(request.body(Body::empty())?)
    }

    pub(crate) fn send(
        &self,
        method: Method,
        path: &str,
        key: &SessionKey,
        body: Option<Value>,
    ) -> anyhow::Result<Request<Body>> {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("authorization", format!("Bearer {}", key.as_str()));
        Ok(match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => request.body(Body::empty())?,
        })
    }

    pub(crate) async fn json<T: DeserializeOwned>(&self, response: Response) -> anyhow::Result<T> {
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub(crate) fn location(&self, response: &Response) -> Option<String> {
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}
