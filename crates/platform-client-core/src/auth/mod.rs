//! Authentication: sessions, OAuth2 grants and the token provider.
//!
//! This module provides:
//! - `Session`: persistable key-value authentication context
//! - `SessionStorage` backends: JSON file, OS keychain, memory, none
//! - `PasswordCredentials` / `RefreshToken`: OAuth2 grants against the token endpoint
//! - `TokenProvider`: current access token with on-demand refresh

pub mod credentials;
pub mod grant;
pub mod provider;
pub mod session;
pub mod storage;
pub mod token;

pub use credentials::KeyringStorage;
pub use grant::{ClientCredentials, GrantType, PasswordCredentials, RefreshToken};
pub use provider::TokenProvider;
pub use session::{keys, Session, SessionData, SharedSession};
pub use storage::{FileStorage, MemoryStorage, NullStorage, SessionError, SessionStorage};
pub use token::{AccessToken, TokenResponse, DEFAULT_TOKEN_TYPE};
