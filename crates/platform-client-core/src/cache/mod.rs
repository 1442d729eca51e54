//! Response caching for authenticated GET requests.
//!
//! Caching is off by default. `cache: true` selects an in-memory cache with
//! default options; an options object picks the backend:
//! - `memory`: bounded in-process cache
//! - `directory`: JSON files on disk, reused across process runs
//!
//! Entries are fresh for `ttl_secs`, or less when the response carries a
//! shorter `Cache-Control: max-age`. `no-store` responses are never cached.

pub mod manager;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::header::{HeaderMap, CACHE_CONTROL};
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::config::ConnectorConfig;

pub use manager::{CachedData, DirectoryCache};
pub use memory::MemoryCache;

/// Default freshness lifetime for cached responses.
const DEFAULT_TTL_SECS: u64 = 300;

/// Default capacity of the memory cache.
const DEFAULT_MAX_ENTRIES: u64 = 1000;

/// Sub-directory of the session directory used by the directory backend.
const HTTP_CACHE_DIR: &str = "http-cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheOptions {
    pub backend: CacheBackend,
    /// Directory for the directory backend; defaults under the session directory
    pub directory: Option<PathBuf>,
    pub ttl_secs: u64,
    /// Capacity of the memory backend
    pub max_entries: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            directory: None,
            ttl_secs: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// The `cache` configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawCacheSetting", into = "RawCacheSetting")]
pub enum CacheSetting {
    #[default]
    Disabled,
    Default,
    Custom(CacheOptions),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCacheSetting {
    Flag(bool),
    Options(CacheOptions),
}

impl From<RawCacheSetting> for CacheSetting {
    fn from(raw: RawCacheSetting) -> Self {
        match raw {
            RawCacheSetting::Flag(false) => CacheSetting::Disabled,
            RawCacheSetting::Flag(true) => CacheSetting::Default,
            RawCacheSetting::Options(options) => CacheSetting::Custom(options),
        }
    }
}

impl From<CacheSetting> for RawCacheSetting {
    fn from(setting: CacheSetting) -> Self {
        match setting {
            CacheSetting::Disabled => RawCacheSetting::Flag(false),
            CacheSetting::Default => RawCacheSetting::Flag(true),
            CacheSetting::Custom(options) => RawCacheSetting::Options(options),
        }
    }
}

/// A stored response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
    /// `max-age` the server sent, if any
    pub max_age_secs: Option<u64>,
}

/// Storage for cached responses, keyed by request URL.
pub trait ResponseCache: Send + Sync {
    /// A fresh entry for `key`, if there is one.
    fn get(&self, key: &str) -> Option<CachedResponse>;

    fn put(&self, key: &str, response: CachedResponse);

    fn invalidate(&self, key: &str);
}

/// The parts of `Cache-Control` that affect storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheDirectives {
    pub no_store: bool,
    pub max_age_secs: Option<u64>,
}

impl CacheDirectives {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut directives = Self::default();
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for directive in value.split(',').map(str::trim) {
                let lower = directive.to_ascii_lowercase();
                if lower == "no-store" {
                    directives.no_store = true;
                } else if let Some(age) = lower.strip_prefix("max-age=") {
                    directives.max_age_secs = age.trim_matches('"').parse().ok();
                }
            }
        }
        directives
    }

    pub fn storable(&self) -> bool {
        !self.no_store && self.max_age_secs != Some(0)
    }
}

/// Lifetime of an entry: the TTL, shortened by the server's max-age.
pub(crate) fn effective_ttl(ttl_secs: u64, response: &CachedResponse) -> u64 {
    response.max_age_secs.map_or(ttl_secs, |age| age.min(ttl_secs))
}

/// Build the cache selected by the connector configuration.
pub fn from_config(config: &ConnectorConfig) -> Result<Option<Arc<dyn ResponseCache>>, ApiError> {
    let options = match &config.cache {
        CacheSetting::Disabled => return Ok(None),
        CacheSetting::Default => CacheOptions::default(),
        CacheSetting::Custom(options) => options.clone(),
    };
    let cache: Arc<dyn ResponseCache> = match options.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(&options)),
        CacheBackend::Directory => {
            let dir = options
                .directory
                .clone()
                .or_else(|| ConnectorConfig::session_dir().map(|d| d.join(HTTP_CACHE_DIR)))
                .ok_or_else(|| ApiError::Config("Could not find a cache directory".to_string()))?;
            Arc::new(DirectoryCache::new(dir, options.ttl_secs)?)
        }
    };
    Ok(Some(cache))
}
