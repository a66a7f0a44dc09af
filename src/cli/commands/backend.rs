use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_BACKEND_URL: &str = "backend-url";
pub const ARG_ANON_KEY: &str = "anon-key";
pub const ARG_IMAGE_BUCKET: &str = "image-bucket";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BACKEND_URL)
                .long(ARG_BACKEND_URL)
                .help("Hosted backend base URL (identity and object storage)")
                .env("GREENQUEST_BACKEND_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ANON_KEY)
                .long(ARG_ANON_KEY)
                .help("Public API key sent as `apikey` to the hosted backend")
                .env("GREENQUEST_ANON_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_IMAGE_BUCKET)
                .long(ARG_IMAGE_BUCKET)
                .help("Object storage bucket for quest proof images")
                .env("GREENQUEST_IMAGE_BUCKET")
                .default_value("quest-images"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: Url,
    pub anon_key: SecretString,
    pub image_bucket: String,
}

impl Options {
    /// # Errors
    /// Returns an error if an argument is missing or the URL does not parse.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_BACKEND_URL)
            .context("missing required argument: --backend-url")?;
        let url = Url::parse(url).with_context(|| format!("invalid --backend-url: {url}"))?;

        let anon_key = matches
            .get_one::<String>(ARG_ANON_KEY)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --anon-key")?;

        let image_bucket = matches
            .get_one::<String>(ARG_IMAGE_BUCKET)
            .cloned()
            .unwrap_or_else(|| "quest-images".to_string());

        Ok(Self {
            url,
            anon_key,
            image_bucket,
        })
    }
}
