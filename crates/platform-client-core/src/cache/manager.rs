use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{effective_ttl, CachedResponse, ResponseCache};
use crate::api::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.cached_at).num_seconds()
    }

    /// Older than `ttl_secs`. Entries from the future (clock skew) count as fresh.
    pub fn is_stale(&self, ttl_secs: u64) -> bool {
        let seconds = i64::try_from(ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        let ttl = Duration::seconds(seconds);
        Utc::now() - self.cached_at >= ttl
    }
}

/// Response cache backed by one JSON file per URL.
pub struct DirectoryCache {
    cache_dir: PathBuf,
    ttl_secs: u64,
}

impl DirectoryCache {
    pub fn new(cache_dir: PathBuf, ttl_secs: u64) -> Result<Self, ApiError> {
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            ApiError::Config(format!(
                "Failed to create cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;
        Ok(Self { cache_dir, ttl_secs })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.cache_dir.join(format!("{}.json", digest))
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<CachedData<T>> {
        let path = self.cache_path(key);
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, ?path, "Failed to read cache file");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(error = %e, ?path, "Failed to parse cache file");
                None
            }
        }
    }

    fn save<T: Serialize>(&self, key: &str, data: &T) {
        let cached = CachedData::new(data);
        let path = self.cache_path(key);
        let result = serde_json::to_string_pretty(&cached)
            .map_err(|e| e.to_string())
            .and_then(|contents| std::fs::write(&path, contents).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(error = %e, ?path, "Failed to write cache file");
        }
    }

    fn remove(&self, key: &str) {
        let path = self.cache_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, ?path, "Failed to remove cache file");
            }
        }
    }
}

impl ResponseCache for DirectoryCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let cached: CachedData<CachedResponse> = self.load(key)?;
        let ttl = effective_ttl(self.ttl_secs, &cached.data);
        if cached.is_stale(ttl) {
            debug!(key, age = cached.age_seconds(), "Cache entry stale");
            self.remove(key);
            return None;
        }
        Some(cached.data)
    }

    fn put(&self, key: &str, response: CachedResponse) {
        self.save(key, &response);
    }

    fn invalidate(&self, key: &str) {
        self.remove(key);
    }
}

// ============================================================================
// Tests
// ============================================================================
