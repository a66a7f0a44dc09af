//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, backend};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let backend_opts = backend::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        backend_url: backend_opts.url,
        anon_key: backend_opts.anon_key,
        frontend_url: auth_opts.frontend_url,
        image_bucket: backend_opts.image_bucket,
        auth_settle_ms: auth_opts.settle_ms,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_env(
        backend_url: Option<&'static str>,
        frontend_url: Option<&'static str>,
    ) -> [(&'static str, Option<&'static str>); 7] {
        [
            ("GREENQUEST_PORT", None),
            ("GREENQUEST_DSN", Some("postgres://user@localhost:5432/greenquest")),
            ("GREENQUEST_BACKEND_URL", backend_url),
            ("GREENQUEST_ANON_KEY", Some("anon-key")),
            ("GREENQUEST_FRONTEND_URL", frontend_url),
            ("GREENQUEST_IMAGE_BUCKET", None),
            ("GREENQUEST_AUTH_SETTLE_MS", None),
        ]
    }

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            base_env(Some("https://project.backend.example"), None),
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["greenquest"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.backend_url.as_str(), "https://project.backend.example/");
                    assert_eq!(args.anon_key.expose_secret(), "anon-key");
                    assert_eq!(args.frontend_url, "http://localhost:5173");
                    assert_eq!(args.image_bucket, "quest-images");
                    assert_eq!(args.auth_settle_ms, 2000);
                    assert_eq!(args.session_ttl_seconds, 604_800);
                }
            },
        );
    }

    #[test]
    fn invalid_backend_url() {
        temp_env::with_vars(base_env(Some("not a url"), None), || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["greenquest"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("invalid --backend-url"));
            }
        });
    }

    #[test]
    fn invalid_frontend_url() {
        temp_env::with_vars(
            base_env(Some("https://project.backend.example"), Some("localhost")),
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["greenquest"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("invalid --frontend-url"));
                }
            },
        );
    }
}
