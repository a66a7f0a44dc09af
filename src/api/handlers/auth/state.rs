//! Cookie and redirect settings shared by the auth handlers.

use crate::auth::paths;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    /// Where confirmation emails send the user back to.
    #[must_use]
    pub fn email_redirect_to(&self) -> String {
        format!(
            "{}{}",
            self.frontend_base_url.trim_end_matches('/'),
            paths::AUTH_CALLBACK
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_redirect_strips_trailing_slash() {
        let config = AuthConfig::new("http://localhost:5173/".to_string());
        assert_eq!(
            config.email_redirect_to(),
            "http://localhost:5173/auth/callback"
        );
        assert!(!config.session_cookie_secure());
    }

    #[test]
    fn https_frontend_sets_secure_cookies() {
        let config = AuthConfig::new("https://greenquest.dev".to_string()).with_session_ttl_seconds(60);
        assert!(config.session_cookie_secure());
        assert_eq!(config.session_ttl_seconds(), 60);
    }
}
