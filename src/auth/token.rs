use super::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// How long before expiry an ID token is considered stale and gets refreshed.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Claims carried by a Firebase ID token that the client cares about.
#[derive(Debug, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl IdTokenClaims {
    /// Reads the payload of an ID token.
    ///
    /// The signature is not checked: the token was just handed to us by the
    /// token endpoint over TLS and is only inspected for display purposes.
    pub fn peek(token: &str) -> Result<Self, AuthError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::InvalidToken("expected three dot-separated parts".into()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidToken(format!("payload is not base64url: {}", e)))?;

        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Credentials of the signed-in user.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

/// Converts the `expiresIn` field (seconds, sent as a string) to an absolute instant.
pub(crate) fn expiry_from(expires_in: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
    let secs: i64 = expires_in
        .parse()
        .map_err(|e| AuthError::ApiError(format!("invalid expiresIn '{}': {}", expires_in, e)))?;
    Ok(now + Duration::seconds(secs))
}
