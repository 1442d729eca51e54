use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use super::grant::{ClientCredentials, RefreshToken};
use super::session::Session;
use super::token::AccessToken;
use crate::api::{build_http_client, ApiError};
use crate::config::ConnectorConfig;

/// Holds the current access token and refreshes it on demand.
///
/// Built once per connector. Without a refresh token the provider only
/// presents the token it was given.
pub struct TokenProvider {
    http: Client,
    token_url: Url,
    current: RwLock<Option<AccessToken>>,
    refresh_grant: RwLock<Option<Arc<RefreshToken>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    refreshes: AtomicUsize,
}

impl TokenProvider {
    pub fn new(
        http: Client,
        token_url: Url,
        access_token: Option<AccessToken>,
        refresh_grant: Option<RefreshToken>,
    ) -> Self {
        Self {
            http,
            token_url,
            current: RwLock::new(access_token),
            refresh_grant: RwLock::new(refresh_grant.map(Arc::new)),
            refresh_lock: tokio::sync::Mutex::new(()),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Provider seeded from whatever tokens the session holds.
    ///
    /// Fails with [`ApiError::NotLoggedIn`] if the session has neither an
    /// access token nor a refresh token.
    pub fn from_session(config: &ConnectorConfig, session: &Session) -> Result<Self, ApiError> {
        if !session.is_logged_in() {
            return Err(ApiError::NotLoggedIn);
        }
        let http = build_http_client(config)?;
        let token_url = config.token_endpoint()?;

        let refresh_grant = session
            .refresh_token()
            .map(|t| RefreshToken::new(config.client_credentials(), t));
        let access_token = session
            .access_token()
            .map(|t| AccessToken::from_session(t, session.token_type(), session.expires()));

        debug!(
            has_access_token = access_token.is_some(),
            can_refresh = refresh_grant.is_some(),
            "Token provider created"
        );
        Ok(Self::new(http, token_url, access_token, refresh_grant))
    }

    /// Current access token, including any refreshed since construction.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.current.read().clone()
    }

    /// Current refresh token, including any rotated since construction.
    pub fn refresh_token(&self) -> Option<String> {
        self.refresh_grant.read().as_ref().map(|g| g.current())
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_grant.read().is_some()
    }

    /// Number of successful refreshes performed by this provider.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    pub fn set_access_token(&self, token: AccessToken) {
        *self.current.write() = Some(token);
    }

    /// Swap in tokens from a new login.
    pub fn replace(
        &self,
        token: AccessToken,
        refresh_token: Option<&str>,
        credentials: ClientCredentials,
    ) {
        *self.current.write() = Some(token);
        *self.refresh_grant.write() =
            refresh_token.map(|t| Arc::new(RefreshToken::new(credentials, t)));
    }

    /// Drop both the access token and the refresh grant.
    pub fn clear(&self) {
        *self.current.write() = None;
        *self.refresh_grant.write() = None;
    }

    /// Unconditionally run the refresh grant.
    pub async fn refresh(&self) -> Result<AccessToken, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        self.run_refresh().await
    }

    /// A token worth sending: the current one unless it is missing or expired
    /// and a refresh is possible.
    pub async fn valid_token(&self) -> Result<AccessToken, ApiError> {
        self.request_token().await.map(|(token, _)| token)
    }

    /// Like [`valid_token`](Self::valid_token), also reporting whether the
    /// token came out of a refresh.
    pub(crate) async fn request_token(&self) -> Result<(AccessToken, bool), ApiError> {
        match self.access_token() {
            Some(token) if !token.is_expired() || !self.can_refresh() => Ok((token, false)),
            Some(token) => Ok((self.refresh_unless_replaced(Some(token.token())).await?, true)),
            None if self.can_refresh() => Ok((self.refresh_unless_replaced(None).await?, true)),
            None => Err(ApiError::NotLoggedIn),
        }
    }

    /// Refresh after the server rejected `rejected`. If another caller already
    /// replaced it while we waited, the replacement is returned instead.
    pub async fn refresh_rejected(&self, rejected: &AccessToken) -> Result<AccessToken, ApiError> {
        self.refresh_unless_replaced(Some(rejected.token())).await
    }

    async fn refresh_unless_replaced(&self, seen: Option<&str>) -> Result<AccessToken, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.access_token() {
            if Some(current.token()) != seen && !current.is_expired() {
                debug!("Token already refreshed by another request");
                return Ok(current);
            }
        }
        self.run_refresh().await
    }

    async fn run_refresh(&self) -> Result<AccessToken, ApiError> {
        let grant = self
            .refresh_grant
            .read()
            .clone()
            .ok_or(ApiError::Unauthorized)?;
        let response = grant.get_token(&self.http, &self.token_url).await?;
        let (token, _) = response.into_parts();
        *self.current.write() = Some(token.clone());
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!(expires_at = ?token.expires_at(), "Access token refreshed");
        Ok(token)
    }
}
