//! Platform client core library.
//!
//! This crate handles authentication against the platform accounts service and
//! hands out a ready-to-use authenticated API client:
//! - `Connector`: login/logout, API token injection, teardown persistence
//! - `auth`: sessions and their storage backends, OAuth2 grants, token provider
//! - `api`: authenticated REST client and the error type
//! - `cache`: optional response caching for GET requests
//! - `config`: typed connector configuration
//!
//! ```no_run
//! use platform_client_core::{Connector, ConnectorConfig, FileStorage};
//!
//! # async fn run() -> Result<(), platform_client_core::ApiError> {
//! let storage = FileStorage::in_dir("/tmp/platform-client");
//! let mut connector = Connector::from_storage(ConnectorConfig::default(), storage)?;
//! connector.log_in("user@example.com", "secret", false).await?;
//! let me: serde_json::Value = connector.client()?.get("me").await?;
//! println!("{me}");
//! connector.close()
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod connector;

pub use api::{ApiClient, ApiError};
pub use auth::{
    AccessToken, FileStorage, KeyringStorage, MemoryStorage, NullStorage, Session, SessionData,
    SessionError, SessionStorage, SharedSession, TokenProvider,
};
pub use cache::{CacheBackend, CacheOptions, CacheSetting};
pub use config::ConnectorConfig;
pub use connector::{Connector, Lifecycle};
