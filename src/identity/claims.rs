//! Read-only access to the claims embedded in provider access tokens.
//!
//! The signature is not checked here: tokens are only ever read from the
//! service's own session store, never from the client.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("token is not a three-part JWT")]
    Format,
    #[error("invalid base64url payload")]
    Base64,
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode the payload segment of a JWT.
///
/// # Errors
/// Returns an error if the token is malformed.
pub fn token_claims(token: &str) -> Result<Value, ClaimsError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ClaimsError::Format);
    };

    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
        .map_err(|_| ClaimsError::Base64)?;

    Ok(serde_json::from_slice(&bytes)?)
}

/// `user_metadata.role` first (where sign-up stores it), then `app_metadata.role`.
/// Only non-empty strings count.
#[must_use]
pub fn metadata_role(user_metadata: Option<&Value>, app_metadata: Option<&Value>) -> Option<String> {
    [user_metadata, app_metadata]
        .into_iter()
        .flatten()
        .find_map(|metadata| {
            metadata
                .get("role")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(str::to_string)
        })
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &Value) -> String {
    let header = Base64UrlUnpadded::encode_string(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = Base64UrlUnpadded::encode_string(payload.to_string().as_bytes());
    format!("{header}.{body}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_claims_reads_payload() -> Result<(), ClaimsError> {
        let token = encode_test_token(&json!({"sub": "abc", "user_metadata": {"role": "admin"}}));
        let claims = token_claims(&token)?;
        assert_eq!(claims["sub"], "abc");
        Ok(())
    }

    #[test]
    fn token_claims_rejects_wrong_segment_count() {
        assert!(matches!(token_claims("a.b"), Err(ClaimsError::Format)));
        assert!(matches!(token_claims("a.b.c.d"), Err(ClaimsError::Format)));
    }

    #[test]
    fn token_claims_rejects_bad_base64() {
        assert!(matches!(token_claims("a.!!!.c"), Err(ClaimsError::Base64)));
    }

    #[test]
    fn metadata_role_prefers_user_metadata() {
        let user = json!({"role": "user"});
        let app = json!({"role": "admin"});
        assert_eq!(metadata_role(Some(&user), Some(&app)).as_deref(), Some("user"));
    }

    #[test]
    fn metadata_role_skips_empty_and_non_string() {
        let user = json!({"role": "  "});
        let app = json!({"role": "admin"});
        assert_eq!(metadata_role(Some(&user), Some(&app)).as_deref(), Some("admin"));

        let user = json!({"role": 7});
        assert_eq!(metadata_role(Some(&user), None), None);
        assert_eq!(metadata_role(None, None), None);
    }
}
