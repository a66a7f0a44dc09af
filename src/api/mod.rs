use crate::{
    api::handlers::{
        assignments, auth, charities, community, health, pages, profile, quests, submissions,
        users,
    },
    auth::{paths, AuthService, RoleResolver},
    identity::HostedIdentity,
    storage::ObjectStorage,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{delete, get, post, put},
    Extension, Router,
};
use secrecy::SecretString;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Where the hosted backend lives and how to reach it.
#[derive(Clone, Debug)]
pub struct Backend {
    pub url: Url,
    pub anon_key: SecretString,
    pub image_bucket: String,
}

/// Build the router with every route and the shared state as extensions.
#[must_use]
pub fn app(
    pool: PgPool,
    auth_service: Arc<AuthService>,
    storage: Arc<ObjectStorage>,
    auth_config: auth::AuthConfig,
) -> Router {
    Router::new()
        .route("/health", get(health::health).options(health::health))
        // Pages
        .route(paths::HOME, get(pages::home))
        .route(paths::USER_APP, get(pages::app_page))
        .route(paths::ADMIN_DASHBOARD, get(pages::admin_page))
        .route(paths::COMMUNITY, get(pages::community_page))
        .route(paths::REDEEM, get(pages::redeem_page))
        .route(paths::PROFILE, get(pages::profile_page))
        // Sign-in flows
        .route(
            paths::LOGIN,
            get(auth::login::login_page).post(auth::login::login),
        )
        .route(
            paths::SIGNUP,
            get(auth::login::signup_page).post(auth::signup::signup),
        )
        .route(
            paths::ADMIN_LOGIN,
            get(auth::login::admin_login_page).post(auth::login::admin_login),
        )
        .route(
            paths::ADMIN_SIGNUP,
            get(auth::login::admin_signup_page).post(auth::signup::admin_signup),
        )
        .route(paths::AUTH_CALLBACK, get(auth::callback::callback))
        .route(
            "/logout",
            get(auth::session::logout).post(auth::session::logout),
        )
        .route("/v1/auth/session", get(auth::session::session))
        // Student data
        .route("/v1/me", get(profile::get_me).patch(profile::patch_me))
        .route("/v1/quests", get(quests::catalog))
        .route("/v1/assignments", get(assignments::my_assignments))
        .route(
            "/v1/assignments/:id/complete",
            post(assignments::complete_assignment),
        )
        .route(
            "/v1/submissions",
            get(submissions::my_submissions)
                .post(submissions::submit)
                .layer(DefaultBodyLimit::max(submissions::SUBMISSION_BODY_LIMIT)),
        )
        .route("/v1/community", get(community::feed))
        .route("/v1/charities", get(charities::list_charities))
        .route("/v1/donations", post(charities::donate))
        // Admin data
        .route("/v1/admin/users", get(users::list_users))
        .route(
            "/v1/admin/quests",
            get(quests::list_quests).post(quests::create_quest),
        )
        .route(
            "/v1/admin/quests/:id",
            put(quests::update_quest).delete(quests::delete_quest),
        )
        .route(
            "/v1/admin/assignments",
            get(assignments::list_assignments).post(assignments::assign_quest),
        )
        .route(
            "/v1/admin/assignments/:id",
            delete(assignments::delete_assignment),
        )
        .route(
            "/v1/admin/assignments/:id/status",
            put(assignments::update_status),
        )
        .route(
            "/v1/admin/submissions",
            get(submissions::pending_submissions),
        )
        .route(
            "/v1/admin/submissions/:id/approve",
            post(submissions::approve),
        )
        .route(
            "/v1/admin/submissions/:id/reject",
            post(submissions::reject),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .fallback(pages::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(auth_service))
                .layer(Extension(storage))
                .layer(Extension(auth_config))
                .layer(Extension(pool)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    backend: Backend,
    auth_config: auth::AuthConfig,
    settle_timeout: Duration,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let identity = HostedIdentity::new(
        &backend.url,
        backend.anon_key.clone(),
        auth_config.email_redirect_to(),
    )
    .context("Failed to build identity client")?;
    let storage = ObjectStorage::new(&backend.url, backend.anon_key, backend.image_bucket)
        .context("Failed to build storage client")?;

    let auth_service = Arc::new(
        AuthService::new(
            Arc::new(identity),
            RoleResolver::new(Arc::new(pool.clone())),
            settle_timeout,
        )
        .with_session_ttl_seconds(auth_config.session_ttl_seconds()),
    );
    auth_service.start();

    let frontend_origin = frontend_origin(auth_config.frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let router = app(pool, auth_service.clone(), Arc::new(storage), auth_config).layer(cors);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            auth_service.shutdown().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
