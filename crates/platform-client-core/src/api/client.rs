//! Authenticated client for the platform REST API.
//!
//! Every request carries `Authorization: <tokenType> <accessToken>` from the
//! shared [`TokenProvider`]. A 401 triggers one refresh and one retry when a
//! refresh token is available; a second 401 is returned as
//! [`ApiError::Unauthorized`].

use std::sync::Arc;

use reqwest::{header, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::ApiError;
use crate::auth::{AccessToken, TokenProvider};
use crate::cache::{CacheDirectives, CachedResponse, ResponseCache};
use crate::config::ConnectorConfig;

/// HTTP client with the configured User-Agent, verbosity and TLS policy.
pub fn build_http_client(config: &ConnectorConfig) -> Result<Client, ApiError> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connection_verbose(config.debug)
        .danger_accept_invalid_certs(!config.verify)
        .build()
        .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// API client for the platform.
/// Clone is cheap - the HTTP client, token provider and cache are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    tokens: Arc<TokenProvider>,
    cache: Option<Arc<dyn ResponseCache>>,
    debug: bool,
}

impl ApiClient {
    pub fn new(
        client: Client,
        base_url: Url,
        tokens: Arc<TokenProvider>,
        cache: Option<Arc<dyn ResponseCache>>,
        debug: bool,
    ) -> Self {
        Self {
            client,
            base_url,
            tokens,
            cache,
            debug,
        }
    }

    pub fn token_provider(&self) -> &Arc<TokenProvider> {
        &self.tokens
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Resolve `path` against the base URL; absolute URLs pass through.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Config(format!("Invalid request path '{}': {}", path, e)))
    }

    /// Check if response is successful, returning an error with body if not.
    pub(crate) async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    fn parse_json<T: DeserializeOwned>(text: &str, url: &Url) -> Result<T, ApiError> {
        // Empty bodies (204 and friends) decode as null
        let text = if text.trim().is_empty() { "null" } else { text };
        serde_json::from_str(text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        token: &AccessToken,
    ) -> Result<Response, ApiError> {
        if self.debug {
            debug!(%method, %url, "Sending API request");
        }
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(header::AUTHORIZATION, token.authorization())
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send an authenticated request, refreshing and retrying once on 401.
    /// Non-2xx responses become errors.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path)?;
        let (token, refreshed) = self.tokens.request_token().await?;
        let response = self.dispatch(&method, &url, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_response(response).await;
        }
        // One refresh per request, whether it happened before sending or after a 401
        if refreshed || !self.tokens.can_refresh() {
            return Err(ApiError::Unauthorized);
        }

        warn!(%url, "Access token rejected, refreshing");
        let token = self.tokens.refresh_rejected(&token).await?;
        let response = self.dispatch(&method, &url, body, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        Self::check_response(response).await
    }

    /// GET a response body as text, served from the cache when fresh.
    pub async fn get_text(&self, path: &str) -> Result<String, ApiError> {
        let url = self.url(path)?;
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(url.as_str())) {
            debug!(%url, "Cache hit");
            return Ok(hit.body);
        }

        let response = self.send(Method::GET, url.as_str(), None).await?;
        let status = response.status();
        let directives = CacheDirectives::from_headers(response.headers());
        let text = response.text().await?;

        if let Some(cache) = &self.cache {
            if directives.storable() {
                cache.put(
                    url.as_str(),
                    CachedResponse {
                        status: status.as_u16(),
                        body: text.clone(),
                        max_age_secs: directives.max_age_secs,
                    },
                );
            }
        }
        Ok(text)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path)?;
        let text = self.get_text(url.as_str()).await?;
        Self::parse_json(&text, &url)
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let url = self.url(path)?;
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to serialize request body: {}", e)))?;

        let response = self.send(method, url.as_str(), body.as_ref()).await?;
        if let Some(cache) = &self.cache {
            cache.invalidate(url.as_str());
        }
        let text = response.text().await?;
        Self::parse_json(&text, &url)
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send_json(Method::POST, path, Some(body)).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send_json(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send_json(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let _: Value = self.send_json::<Value, Value>(Method::DELETE, path, None).await?;
        Ok(())
    }
}
