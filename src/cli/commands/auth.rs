use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use url::Url;

pub const ARG_FRONTEND_URL: &str = "frontend-url";
pub const ARG_AUTH_SETTLE_MS: &str = "auth-settle-ms";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend base URL, used for CORS and email confirmation links")
                .env("GREENQUEST_FRONTEND_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_AUTH_SETTLE_MS)
                .long(ARG_AUTH_SETTLE_MS)
                .help("How long a request waits for auth state to settle, in milliseconds")
                .env("GREENQUEST_AUTH_SETTLE_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("GREENQUEST_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub frontend_url: String,
    pub settle_ms: u64,
    pub session_ttl_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if the frontend URL is not an absolute URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let frontend_url = matches
            .get_one::<String>(ARG_FRONTEND_URL)
            .cloned()
            .unwrap_or_else(|| "http://localhost:5173".to_string());
        Url::parse(&frontend_url)
            .with_context(|| format!("invalid --frontend-url: {frontend_url}"))?;

        Ok(Self {
            frontend_url,
            settle_ms: matches
                .get_one::<u64>(ARG_AUTH_SETTLE_MS)
                .copied()
                .unwrap_or(2000),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(604_800),
        })
    }
}
