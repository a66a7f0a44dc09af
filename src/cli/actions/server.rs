use crate::api::{self, handlers::auth::AuthConfig, Backend};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub backend_url: Url,
    pub anon_key: SecretString,
    pub frontend_url: String,
    pub image_bucket: String,
    pub auth_settle_ms: u64,
    pub session_ttl_seconds: i64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the backend clients cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        port = args.port,
        backend = %args.backend_url,
        frontend = %args.frontend_url,
        bucket = %args.image_bucket,
        "starting server"
    );

    let auth_config =
        AuthConfig::new(args.frontend_url).with_session_ttl_seconds(args.session_ttl_seconds);

    let backend = Backend {
        url: args.backend_url,
        anon_key: args.anon_key,
        image_bucket: args.image_bucket,
    };

    api::new(
        args.port,
        args.dsn,
        backend,
        auth_config,
        Duration::from_millis(args.auth_settle_ms),
    )
    .await
}
