//! Authenticated REST API access.
//!
//! `ApiClient` sends requests with the current OAuth2 access token and
//! handles the one-shot refresh-and-retry on 401. `ApiError` is the error
//! taxonomy shared by the whole crate.

pub mod client;
pub mod error;

pub use client::{build_http_client, ApiClient};
pub use error::{ApiError, INVALID_CREDENTIALS_MESSAGE};
