//! The connector: login, logout, token injection and the authenticated client.
//!
//! A [`Connector`] owns the configuration, shares a [`SharedSession`] with its
//! caller, and builds the [`TokenProvider`] and [`ApiClient`] on first use.
//!
//! Teardown runs exactly once, either through [`Connector::close`] or when the
//! connector is dropped. It writes the provider's current (possibly refreshed)
//! tokens back into the session and saves it, or wipes the session after a
//! logout.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{build_http_client, ApiClient, ApiError};
use crate::auth::{
    keys, AccessToken, PasswordCredentials, Session, SessionStorage, SharedSession, TokenProvider,
};
use crate::cache;
use crate::config::ConnectorConfig;

/// Where the connector is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Normal operation; teardown persists the current tokens.
    Active,
    /// `log_out` was called; teardown wipes the session.
    LoggedOut,
    /// Teardown already ran.
    Closed,
}

pub struct Connector {
    config: ConnectorConfig,
    accounts: Url,
    session: SharedSession,
    token_provider: OnceCell<Arc<TokenProvider>>,
    client: OnceCell<ApiClient>,
    lifecycle: Lifecycle,
}

impl Connector {
    /// Connector with a fresh session that is never persisted.
    pub fn new(config: ConnectorConfig) -> Result<Self, ApiError> {
        Self::with_session(config, SharedSession::new(Session::in_memory()))
    }

    /// Connector using `session`. The session stays shared: the caller may
    /// keep reading and writing it through its own handle.
    pub fn with_session(mut config: ConnectorConfig, session: SharedSession) -> Result<Self, ApiError> {
        let accounts = config.accounts_url()?;
        // Consumed here; never visible through `config()`
        if let Some(token) = config.api_token.take() {
            debug!("Using API token from configuration");
            session.lock().set(keys::ACCESS_TOKEN, token);
        }

        Ok(Self {
            config,
            accounts,
            session,
            token_provider: OnceCell::new(),
            client: OnceCell::new(),
            lifecycle: Lifecycle::Active,
        })
    }

    /// Connector whose session is restored from `storage` and saved back to it.
    pub fn from_storage(
        config: ConnectorConfig,
        storage: impl SessionStorage + 'static,
    ) -> Result<Self, ApiError> {
        let session = Session::load(storage)?;
        Self::with_session(config, SharedSession::new(session))
    }

    pub fn accounts_endpoint(&self) -> &Url {
        &self.accounts
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.lock().is_logged_in()
    }

    /// The shared session handle (not a copy).
    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Use a pre-shared API token as the access token. The refresh token and
    /// expiry in the session are left alone; a built provider gets the token
    /// without an expiry.
    pub fn set_api_token(&mut self, token: &str) {
        let mut session = self.session.lock();
        session.set(keys::ACCESS_TOKEN, token);
        if let Some(provider) = self.token_provider.get() {
            provider.set_access_token(AccessToken::from_session(token, session.token_type(), None));
        }
        self.lifecycle = Lifecycle::Active;
    }

    /// Log in with the password grant.
    ///
    /// Does nothing when already logged in as `username`, unless `force` is
    /// set. On failure the session is left exactly as it was.
    pub async fn log_in(&mut self, username: &str, password: &str, force: bool) -> Result<(), ApiError> {
        {
            let session = self.session.lock();
            if !force && session.is_logged_in() && session.username() == Some(username) {
                debug!(username, "Already logged in");
                return Ok(());
            }
        }

        let http = build_http_client(&self.config)?;
        let token_url = self.config.token_endpoint()?;
        let grant = PasswordCredentials::new(self.config.client_credentials(), username, password);
        let (token, refresh_token) = grant.get_token(&http, &token_url).await?.into_parts();

        {
            let mut session = self.session.lock();
            let previous = session.data().clone();
            let was_dirty = session.is_dirty();
            session.set(keys::USERNAME, username);
            session.set(keys::ACCESS_TOKEN, token.token());
            session.set(keys::TOKEN_TYPE, token.token_type());
            match token.expires_timestamp() {
                Some(expires) => session.set(keys::EXPIRES, expires),
                None => session.remove(keys::EXPIRES),
            }
            match refresh_token.as_deref() {
                Some(refresh) => session.set(keys::REFRESH_TOKEN, refresh),
                None => session.remove(keys::REFRESH_TOKEN),
            }
            if let Err(e) = session.save() {
                session.restore(previous, was_dirty);
                return Err(e.into());
            }
        }
        self.lifecycle = Lifecycle::Active;

        // A provider built before this login must not keep the old tokens
        if let Some(provider) = self.token_provider.get() {
            provider.replace(token, refresh_token.as_deref(), self.config.client_credentials());
        }
        info!(username, "Logged in");
        Ok(())
    }

    /// Forget the session and persist the empty session right away.
    pub fn log_out(&mut self) -> Result<(), ApiError> {
        self.lifecycle = Lifecycle::LoggedOut;
        if let Some(provider) = self.token_provider.get() {
            provider.clear();
        }
        let mut session = self.session.lock();
        session.clear();
        session.save()?;
        info!("Logged out");
        Ok(())
    }

    /// The token provider, if one has been built.
    pub fn token_provider(&self) -> Option<&Arc<TokenProvider>> {
        self.token_provider.get()
    }

    fn provider(&self) -> Result<Arc<TokenProvider>, ApiError> {
        self.token_provider
            .get_or_try_init(|| {
                let session = self.session.lock();
                TokenProvider::from_session(&self.config, &session).map(Arc::new)
            })
            .cloned()
    }

    /// The authenticated API client, built on first call.
    ///
    /// Fails with [`ApiError::NotLoggedIn`] when the session holds no token
    /// or after `log_out`.
    pub fn client(&self) -> Result<&ApiClient, ApiError> {
        if self.lifecycle == Lifecycle::LoggedOut {
            return Err(ApiError::NotLoggedIn);
        }
        self.client.get_or_try_init(|| -> Result<ApiClient, ApiError> {
            let tokens = self.provider()?;
            let http = build_http_client(&self.config)?;
            let cache = cache::from_config(&self.config)?;
            debug!(
                base_url = %self.accounts,
                cached = cache.is_some(),
                verify = self.config.verify,
                "API client created"
            );
            Ok(ApiClient::new(http, self.accounts.clone(), tokens, cache, self.config.debug))
        })
    }

    /// Run teardown now and report a failed save.
    pub fn close(mut self) -> Result<(), ApiError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), ApiError> {
        let state = std::mem::replace(&mut self.lifecycle, Lifecycle::Closed);
        let mut session = self.session.lock();
        match state {
            Lifecycle::Closed => return Ok(()),
            Lifecycle::LoggedOut => session.clear(),
            Lifecycle::Active => {
                let Some(provider) = self.token_provider.get() else {
                    return Ok(());
                };
                if let Some(token) = provider.access_token() {
                    session.set(keys::ACCESS_TOKEN, token.token());
                    match token.expires_timestamp() {
                        Some(expires) => session.set(keys::EXPIRES, expires),
                        None => session.remove(keys::EXPIRES),
                    }
                }
                if let Some(refresh) = provider.refresh_token() {
                    session.set(keys::REFRESH_TOKEN, refresh);
                }
            }
        }
        session.save()?;
        debug!(?state, "Connector closed");
        Ok(())
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "Failed to save session on teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::auth::{MemoryStorage, SessionData};

    fn stored(pairs: serde_json::Value) -> MemoryStorage {
        let data: SessionData = serde_json::from_value(pairs).expect("object");
        MemoryStorage::with_data(data)
    }

    #[test]
    fn test_api_token_is_consumed() {
        let config = ConnectorConfig::default().with_api_token("T");
        let connector = Connector::new(config).expect("connector");

        assert!(connector.is_logged_in());
        assert_eq!(connector.session().lock().access_token(), Some("T"));
        assert!(connector.config().api_token.is_none());
        assert!(connector.token_provider().is_none());
    }

    #[test]
    fn test_invalid_accounts_url_is_rejected() {
        let config = ConnectorConfig {
            accounts: "::".to_string(),
            ..ConnectorConfig::default()
        };
        assert!(matches!(Connector::new(config), Err(ApiError::Config(_))));
    }

    #[test]
    fn test_client_requires_login() {
        let connector = Connector::new(ConnectorConfig::default()).expect("connector");
        assert!(!connector.is_logged_in());
        assert!(matches!(connector.client(), Err(ApiError::NotLoggedIn)));
        assert!(connector.token_provider().is_none());
    }

    #[test]
    fn test_set_api_token_keeps_refresh_token() {
        let storage = stored(json!({"refreshToken": "r1", "expires": 0}));
        let mut connector =
            Connector::from_storage(ConnectorConfig::default(), storage).expect("connector");
        connector.set_api_token("api");

        let session = connector.session();
        let session = session.lock();
        assert_eq!(session.access_token(), Some("api"));
        assert_eq!(session.refresh_token(), Some("r1"));
        assert!(session.has(keys::EXPIRES));
    }

    #[test]
    fn test_set_api_token_updates_built_provider() {
        let mut connector =
            Connector::new(ConnectorConfig::default().with_api_token("first")).expect("connector");
        let provider = Arc::clone(connector.client().expect("client").token_provider());
        connector.set_api_token("second");
        assert_eq!(provider.access_token().map(|t| t.token().to_string()), Some("second".to_string()));
    }

    #[test]
    fn test_logged_out_refresh_token_stays_gone() {
        let storage = stored(json!({
            "username": "u",
            "accessToken": "a",
            "refreshToken": "secret-refresh"
        }));
        let mut connector =
            Connector::from_storage(ConnectorConfig::default(), storage.clone()).expect("connector");
        connector.client().expect("client");
        connector.log_out().expect("log out");
        connector.set_api_token("api-T");
        connector.close().expect("close");

        let persisted = storage.persisted();
        assert_eq!(persisted.get("accessToken"), Some(&json!("api-T")));
        assert!(!persisted.contains_key("refreshToken"));
        assert!(!persisted.contains_key("username"));
    }

    #[tokio::test]
    async fn test_api_token_is_sent_despite_stale_session_expiry() {
        let storage = stored(json!({"accessToken": "old", "expires": 1000, "refreshToken": "r"}));
        let mut connector =
            Connector::from_storage(ConnectorConfig::default(), storage).expect("connector");
        let provider = Arc::clone(connector.client().expect("client").token_provider());
        connector.set_api_token("fresh-api");

        let injected = provider.access_token().expect("token");
        assert!(!injected.is_expired());
        assert_eq!(injected.expires_at(), None);
        // No refresh: the default accounts endpoint is never contacted
        let token = provider.valid_token().await.expect("token");
        assert_eq!(token.token(), "fresh-api");
        assert_eq!(provider.refresh_count(), 0);
        assert_eq!(connector.session().lock().expires(), Some(1000));
    }

    #[test]
    fn test_client_is_memoized() {
        let connector =
            Connector::new(ConnectorConfig::default().with_api_token("T")).expect("connector");
        let first = Arc::clone(connector.client().expect("client").token_provider());
        let second = Arc::clone(connector.client().expect("client").token_provider());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(connector
            .token_provider()
            .is_some_and(|p| Arc::ptr_eq(p, &first)));
    }

    #[test]
    fn test_log_out_persists_empty_session() {
        let storage = stored(json!({
            "username": "u",
            "accessToken": "a",
            "tokenType": "bearer",
            "expires": 4_102_444_800_i64,
            "refreshToken": "r"
        }));
        let mut connector =
            Connector::from_storage(ConnectorConfig::default(), storage.clone()).expect("connector");
        connector.log_out().expect("log out");

        assert_eq!(connector.lifecycle(), Lifecycle::LoggedOut);
        assert!(!connector.is_logged_in());
        assert!(storage.persisted().is_empty());
        assert!(matches!(connector.client(), Err(ApiError::NotLoggedIn)));

        connector.close().expect("close");
        assert!(storage.persisted().is_empty());
    }

    #[test]
    fn test_teardown_without_provider_writes_nothing() {
        let storage = stored(json!({"accessToken": "a"}));
        let mut connector =
            Connector::from_storage(ConnectorConfig::default(), storage.clone()).expect("connector");
        connector.set_api_token("changed");
        drop(connector);

        assert_eq!(storage.save_count(), 0);
        assert_eq!(storage.persisted().get("accessToken"), Some(&json!("a")));
    }

    #[test]
    fn test_teardown_persists_provider_token() {
        let storage = stored(json!({"accessToken": "a", "expires": 4_102_444_800_i64}));
        let mut connector =
            Connector::from_storage(ConnectorConfig::default(), storage.clone()).expect("connector");
        connector.client().expect("client");
        connector.set_api_token("b");
        connector.close().expect("close");

        let persisted = storage.persisted();
        assert_eq!(persisted.get("accessToken"), Some(&json!("b")));
        assert_eq!(persisted.get("expires"), Some(&json!(4_102_444_800_i64)));
        assert_eq!(storage.save_count(), 1);
    }

    #[test]
    fn test_teardown_runs_once() {
        let storage = stored(json!({"accessToken": "a"}));
        let mut connector =
            Connector::from_storage(ConnectorConfig::default(), storage.clone()).expect("connector");
        connector.log_out().expect("log out");
        connector.close().expect("close");
        // log_out saved once; close re-cleared an already empty session
        assert_eq!(storage.save_count(), 1);
    }

    #[test]
    fn test_injected_session_is_shared() {
        let shared = SharedSession::new(Session::in_memory());
        let connector =
            Connector::with_session(ConnectorConfig::default(), shared.clone()).expect("connector");
        shared.lock().set(keys::REFRESH_TOKEN, "external");

        assert!(connector.is_logged_in());
        assert!(connector.session().ptr_eq(&shared));
        let copy = connector.session().snapshot();
        shared.lock().clear();
        assert!(copy.contains_key(keys::REFRESH_TOKEN));
    }
}
