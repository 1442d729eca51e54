//! Connector configuration.
//!
//! A typed replacement for an options bag: every recognized key is a field
//! with a documented default, and unknown keys are rejected when parsing.
//!
//! Configuration can be stored at `~/.config/platform-client/config.json`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::ApiError;
use crate::auth::ClientCredentials;
use crate::cache::CacheSetting;

/// Application name used for config/session directory paths
const APP_NAME: &str = "platform-client";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_ACCOUNTS_URL: &str = "https://marketplace.commerceguys.com/api/platform/";
pub const DEFAULT_CLIENT_ID: &str = "platform-client-rs";
pub const DEFAULT_TOKEN_URL: &str = "/oauth2/token";

fn default_user_agent() -> String {
    format!(
        "Platform-Client-Rust/{} (+{})",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY")
    )
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Accounts API endpoint; base for the token URL and relative API paths
    pub accounts: String,
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: Option<String>,
    /// Verbose transport logging
    pub debug: bool,
    /// TLS certificate verification
    pub verify: bool,
    /// User-Agent header for every request
    pub user_agent: String,
    /// Response caching: `false`, `true`, or an options object
    pub cache: CacheSetting,
    /// OAuth2 token endpoint, relative to `accounts` or absolute
    pub token_url: String,
    /// Pre-shared API token, consumed when a connector is constructed
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            accounts: DEFAULT_ACCOUNTS_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            debug: false,
            verify: true,
            user_agent: default_user_agent(),
            cache: CacheSetting::Disabled,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_token: None,
        }
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("accounts", &self.accounts)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("debug", &self.debug)
            .field("verify", &self.verify)
            .field("user_agent", &self.user_agent)
            .field("cache", &self.cache)
            .field("token_url", &self.token_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConnectorConfig {
    /// Parse a JSON object; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::Config(e.to_string()))
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    /// `<config dir>/platform-client/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// `<cache dir>/platform-client`, where sessions live by default
    pub fn session_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join(APP_NAME))
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn accounts_url(&self) -> Result<Url, ApiError> {
        Url::parse(&self.accounts)
            .map_err(|e| ApiError::Config(format!("Invalid accounts URL '{}': {}", self.accounts, e)))
    }

    /// Token endpoint resolved against the accounts URL.
    pub fn token_endpoint(&self) -> Result<Url, ApiError> {
        self.accounts_url()?
            .join(&self.token_url)
            .map_err(|e| ApiError::Config(format!("Invalid token URL '{}': {}", self.token_url, e)))
    }

    pub fn client_credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}
