//! OAuth2 grant strategies against the token endpoint.

use parking_lot::Mutex;
use reqwest::{header, Client};
use tracing::debug;
use url::Url;

use super::token::TokenResponse;
use crate::api::error::INVALID_CREDENTIALS_MESSAGE;
use crate::api::{ApiClient, ApiError};

/// OAuth2 client identity, sent as HTTP basic auth on token requests.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// A grant type: its `grant_type` value plus the grant-specific form fields.
pub trait GrantType {
    const GRANT_TYPE: &'static str;

    fn credentials(&self) -> &ClientCredentials;

    fn fields(&self) -> Vec<(&'static str, String)>;
}

/// POST the grant to the token endpoint and decode the response.
async fn exchange<G: GrantType>(
    http: &Client,
    token_url: &Url,
    grant: &G,
) -> Result<TokenResponse, ApiError> {
    let mut form = vec![("grant_type", G::GRANT_TYPE.to_string())];
    form.extend(grant.fields());
    let credentials = grant.credentials();

    debug!(grant_type = G::GRANT_TYPE, url = %token_url, "Requesting token");
    let response = http
        .post(token_url.clone())
        .basic_auth(&credentials.client_id, credentials.client_secret.as_deref())
        .header(header::ACCEPT, "application/json")
        .form(&form)
        .send()
        .await?;

    let response = ApiClient::check_response(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))
}

/// Resource owner password credentials grant.
pub struct PasswordCredentials {
    credentials: ClientCredentials,
    username: String,
    password: String,
}

impl PasswordCredentials {
    pub fn new(credentials: ClientCredentials, username: &str, password: &str) -> Self {
        Self {
            credentials,
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Exchange the username and password for tokens. A 401 from the endpoint
    /// becomes [`ApiError::InvalidCredentials`]; everything else propagates.
    pub async fn get_token(&self, http: &Client, token_url: &Url) -> Result<TokenResponse, ApiError> {
        match exchange(http, token_url, self).await {
            Err(ApiError::Unauthorized) => Err(ApiError::InvalidCredentials(
                INVALID_CREDENTIALS_MESSAGE.to_string(),
            )),
            other => other,
        }
    }
}

impl GrantType for PasswordCredentials {
    const GRANT_TYPE: &'static str = "password";

    fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("username", self.username.clone()),
            ("password", self.password.clone()),
        ]
    }
}

/// Refresh token grant. The stored refresh token is replaced whenever the
/// endpoint rotates it.
pub struct RefreshToken {
    credentials: ClientCredentials,
    refresh_token: Mutex<String>,
}

impl RefreshToken {
    pub fn new(credentials: ClientCredentials, refresh_token: &str) -> Self {
        Self {
            credentials,
            refresh_token: Mutex::new(refresh_token.to_string()),
        }
    }

    pub fn current(&self) -> String {
        self.refresh_token.lock().clone()
    }

    pub async fn get_token(&self, http: &Client, token_url: &Url) -> Result<TokenResponse, ApiError> {
        let response = exchange(http, token_url, self).await?;
        if let Some(rotated) = response.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            *self.refresh_token.lock() = rotated.to_string();
            debug!("Refresh token rotated");
        }
        Ok(response)
    }
}

impl GrantType for RefreshToken {
    const GRANT_TYPE: &'static str = "refresh_token";

    fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![("refresh_token", self.current())]
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            client_id: "test-client".to_string(),
            client_secret: None,
        }
    }

    fn token_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/oauth2/token", server.uri())).expect("url")
    }

    #[tokio::test]
    async fn test_password_grant_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alice"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a1",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "r1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = PasswordCredentials::new(credentials(), "alice", "pw");
        let response = grant.get_token(&Client::new(), &token_url(&server)).await.expect("token");
        assert_eq!(response.access_token, "a1");
        assert_eq!(response.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_password_grant_401_is_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"invalid_grant\"}"))
            .mount(&server)
            .await;

        let grant = PasswordCredentials::new(credentials(), "alice", "wrong");
        let err = grant.get_token(&Client::new(), &token_url(&server)).await.err().expect("request should fail");
        match err {
            ApiError::InvalidCredentials(message) => {
                assert_eq!(message, INVALID_CREDENTIALS_MESSAGE);
                assert!(!message.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_password_grant_other_status_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let grant = PasswordCredentials::new(credentials(), "alice", "pw");
        let err = grant.get_token(&Client::new(), &token_url(&server)).await.err().expect("request should fail");
        assert_eq!(err.status(), Some(reqwest::StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_refresh_grant_rotates_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a2",
                "refresh_token": "r2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = RefreshToken::new(credentials(), "r1");
        let response = grant.get_token(&Client::new(), &token_url(&server)).await.expect("token");
        assert_eq!(response.access_token, "a2");
        assert_eq!(grant.current(), "r2");
    }
}
