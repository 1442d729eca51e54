use std::time::Duration;

use moka::sync::Cache;

use super::manager::CachedData;
use super::{effective_ttl, CacheOptions, CachedResponse, ResponseCache};

/// Bounded in-process response cache.
pub struct MemoryCache {
    entries: Cache<String, CachedData<CachedResponse>>,
    ttl_secs: u64,
}

impl MemoryCache {
    pub fn new(options: &CacheOptions) -> Self {
        let entries = Cache::builder()
            .max_capacity(options.max_entries)
            .time_to_live(Duration::from_secs(options.ttl_secs))
            .build();
        Self {
            entries,
            ttl_secs: options.ttl_secs,
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let cached = self.entries.get(key)?;
        // max-age shorter than the TTL is enforced here
        if cached.is_stale(effective_ttl(self.ttl_secs, &cached.data)) {
            self.entries.invalidate(key);
            return None;
        }
        Some(cached.data)
    }

    fn put(&self, key: &str, response: CachedResponse) {
        self.entries.insert(key.to_string(), CachedData::new(response));
    }

    fn invalidate(&self, key: &str) {
        self.entries.invalidate(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str, max_age_secs: Option<u64>) -> CachedResponse {
        CachedResponse {
            status: 200,
            body: body.to_string(),
            max_age_secs,
        }
    }

    #[test]
    fn test_memory_cache_hit_and_invalidate() {
        let cache = MemoryCache::new(&CacheOptions::default());
        cache.put("https://api/a", response("a", None));

        assert_eq!(cache.get("https://api/a").map(|r| r.body), Some("a".to_string()));
        assert_eq!(cache.entry_count(), 1);

        cache.invalidate("https://api/a");
        assert!(cache.get("https://api/a").is_none());
    }

    #[test]
    fn test_memory_cache_respects_zero_max_age() {
        let cache = MemoryCache::new(&CacheOptions::default());
        cache.put("k", response("v", Some(0)));
        assert!(cache.get("k").is_none());
    }
}
