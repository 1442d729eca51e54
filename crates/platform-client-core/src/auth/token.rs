use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Token type assumed when the server or session does not name one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// An OAuth2 access token. `expires_at` of `None` means it never expires.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    token_type: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(
        token: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            token: token.into(),
            token_type: token_type.into(),
            expires_at,
        }
    }

    /// Rebuild a token from persisted session fields. A missing type falls
    /// back to `Bearer`; an expiry of zero or less means no expiry.
    pub fn from_session(token: &str, token_type: Option<&str>, expires: Option<i64>) -> Self {
        let expires_at = expires
            .filter(|s| *s > 0)
            .and_then(|s| Utc.timestamp_opt(s, 0).single());
        Self::new(token, token_type.unwrap_or(DEFAULT_TOKEN_TYPE), expires_at)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Expiry as epoch seconds, for the session's `expires` key
    pub fn expires_timestamp(&self) -> Option<i64> {
        self.expires_at.map(|t| t.timestamp())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() >= t).unwrap_or(false)
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// Successful token endpoint response (RFC 6749 section 5.1).
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Split into the access token (expiry computed from now) and the
    /// refresh token, if one was issued.
    pub fn into_parts(self) -> (AccessToken, Option<String>) {
        let expires_at = self
            .expires_in
            .filter(|s| *s > 0)
            .map(|s| Utc::now() + Duration::seconds(s));
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty());
        (
            AccessToken::new(self.access_token, self.token_type, expires_at),
            refresh_token,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_session_defaults() {
        let token = AccessToken::from_session("abc", None, Some(0));
        assert_eq!(token.token_type(), "Bearer");
        assert_eq!(token.expires_at(), None);
        assert!(!token.is_expired());
        assert_eq!(token.authorization(), "Bearer abc");
    }

    #[test]
    fn test_from_session_past_expiry_is_expired() {
        let token = AccessToken::from_session("abc", Some("bearer"), Some(1_000));
        assert!(token.is_expired());
        assert_eq!(token.expires_timestamp(), Some(1_000));
    }

    #[test]
    fn test_token_response_parsing() {
        let json = r#"{"access_token":"a1","token_type":"bearer","expires_in":3600,"refresh_token":"r1"}"#;
        let response: TokenResponse = serde_json::from_str(json).expect("parse");
        let (token, refresh) = response.into_parts();

        assert_eq!(token.token(), "a1");
        assert_eq!(token.token_type(), "bearer");
        assert!(!token.is_expired());
        let remaining = token.expires_at().expect("expiry") - Utc::now();
        assert!(remaining.num_seconds() > 3500);
        assert_eq!(refresh.as_deref(), Some("r1"));
    }

    #[test]
    fn test_token_response_without_expiry_or_refresh() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"a2"}"#).expect("parse");
        let (token, refresh) = response.into_parts();
        assert_eq!(token.token_type(), DEFAULT_TOKEN_TYPE);
        assert_eq!(token.expires_at(), None);
        assert_eq!(refresh, None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::new("secret-value", "Bearer", None);
        assert!(!format!("{:?}", token).contains("secret-value"));
    }
}
