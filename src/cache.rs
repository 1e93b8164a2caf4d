use crate::error::{ApiError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

type Payload = Arc<dyn Any + Send + Sync>;

/// In-memory response cache with per-entry TTL.
///
/// Entries are evicted lazily: an expired entry is treated as absent on the
/// next read and overwritten by the refetch. There is no background sweep and
/// no size bound; the key space is the finite set of catalog endpoints.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

struct CacheEntry {
    value: Payload,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_valid(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the cached value for `key` if present and unexpired, otherwise
    /// run `fetch`, cache its result under `ttl`, and return it.
    ///
    /// Nothing is cached on failure; the next call fetches again. Two callers
    /// missing concurrently both fetch, since deduplication is the throttle
    /// layer's job.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get::<T>(key)? {
            debug!(key, "cache hit");
            return Ok(value);
        }

        debug!(key, "cache miss, fetching");
        let value = fetch().await?;
        self.insert(key, value.clone(), ttl)?;
        Ok(value)
    }

    /// Look up a live entry without fetching. Expired entries read as `None`.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entries = self
            .entries
            .read()
            .map_err(|_| ApiError::Internal("cache lock poisoned".to_string()))?;

        match entries.get(key) {
            Some(entry) if entry.is_valid() => {
                let value = entry.value.clone().downcast::<T>().map_err(|_| {
                    ApiError::Internal(format!("cached value for '{}' has unexpected type", key))
                })?;
                Ok(Some((*value).clone()))
            }
            _ => Ok(None),
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert<T>(&self, key: &str, value: T, ttl: Duration) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ApiError::Internal("cache lock poisoned".to_string()))?;

        entries.insert(
            key.to_string(),
            CacheEntry {
                value: Arc::new(value),
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    /// Drop the entry for `key`. Returns true if an entry was present.
    ///
    /// Used by explicit refresh so a re-fetch before TTL expiry does not
    /// return the stale value.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ApiError::Internal("cache lock poisoned".to_string()))?;
        Ok(entries.remove(key).is_some())
    }

    /// Drop every entry whose key starts with `prefix`. Returns the count.
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ApiError::Internal("cache lock poisoned".to_string()))?;

        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn second_call_within_ttl_hits_cache() {
        let cache = CacheStore::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Vec<String> = cache
                .get_or_fetch("cats", Duration::from_secs(600), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["kayaking".to_string(), "hiking".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value.len(), 2);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "fetch should run once");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let cache = CacheStore::new();
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42u64)
        };
        cache.get_or_fetch("answer", ttl, fetch).await.unwrap();

        tokio::time::advance(ttl + Duration::from_millis(1)).await;

        cache.get_or_fetch("answer", ttl, fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let cache = CacheStore::new();
        let calls = AtomicUsize::new(0);

        let result: Result<u64> = cache
            .get_or_fetch("flaky", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Network("connection reset".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());

        // Next call attempts again and can succeed
        let value: u64 = cache
            .get_or_fetch("flaky", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = CacheStore::new();
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(600);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("fresh".to_string())
        };
        cache.get_or_fetch("list", ttl, fetch).await.unwrap();

        assert!(cache.invalidate("list").unwrap());
        assert!(!cache.invalidate("list").unwrap());

        cache.get_or_fetch("list", ttl, fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_prefix_drops_matching_keys() {
        let cache = CacheStore::new();
        let ttl = Duration::from_secs(600);
        cache.insert("experiences/category/1", 1u64, ttl).unwrap();
        cache.insert("experiences/category/2", 2u64, ttl).unwrap();
        cache.insert("experiences/categories", 3u64, ttl).unwrap();

        let removed = cache.invalidate_prefix("experiences/category/").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_type_is_an_error() {
        let cache = CacheStore::new();
        cache
            .insert("key", "a string".to_string(), Duration::from_secs(60))
            .unwrap();
        let result = cache.get::<u64>("key");
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }
}
