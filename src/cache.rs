//! # Cache Manager
//!
//! A namespaced, fail-soft JSON cache over the shared [`KvStore`]. Every key
//! is transparently prefixed with the manager's namespace, so two managers
//! with different namespaces never collide even on the same store.
//!
//! The availability policy is deliberate and uniform: a store error during
//! any cache operation is logged and converted to a neutral result (miss,
//! `false`, `0`, `None`) rather than propagated. A cache outage must never
//! take down the caller's primary operation.

use crate::error::{StoreError, StoreResult};
use crate::store::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default TTL applied when a `set` does not specify one.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Namespaced cache over the shared store.
#[derive(Debug, Clone)]
pub struct CacheManager {
    store: KvStore,
    namespace: String,
}

impl CacheManager {
    /// Create a cache manager scoped to a namespace.
    pub fn new(store: KvStore, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// The namespace this manager prefixes onto every key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scoped(&self, key: &str) -> String {
        scoped_key(&self.namespace, key)
    }

    /// Get and deserialize a cached value.
    ///
    /// Returns `None` on an absent key, on a store error, and on a payload
    /// that no longer decodes as `T`. Each of those branches is explicit:
    /// decode failures are logged separately from store failures so corrupt
    /// entries are visible in the logs, but both degrade to a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let scoped = self.scoped(key);

        match self.lookup(&scoped).await {
            Ok(Some(value)) => {
                debug!(key = %scoped, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                debug!(key = %scoped, "Cache miss");
                None
            }
            Err(e) if e.is_decode() => {
                warn!(key = %scoped, error = %e, "Cached payload failed to decode, treating as miss");
                None
            }
            Err(e) => {
                warn!(key = %scoped, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    /// Serialize and store a value with the given TTL (default 1 hour).
    ///
    /// Returns whether the write succeeded; a failed cache write is logged
    /// and must not fail the caller's primary operation.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let scoped = self.scoped(key);
        let ttl = ttl.unwrap_or(DEFAULT_CACHE_TTL);

        match self.write(&scoped, value, ttl).await {
            Ok(()) => {
                debug!(key = %scoped, ttl_secs = ttl.as_secs(), "Cached value");
                true
            }
            Err(e) => {
                warn!(key = %scoped, error = %e, "Cache set failed");
                false
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, scoped: &str) -> StoreResult<Option<T>> {
        match self.store.get(scoped).await? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|source| {
                StoreError::Decode {
                    key: scoped.to_string(),
                    source,
                }
            }),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, scoped: &str, value: &T, ttl: Duration) -> StoreResult<()> {
        let payload = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: scoped.to_string(),
            source,
        })?;
        self.store.set_with_ttl(scoped, &payload, ttl).await
    }

    /// Delete a key. Idempotent; returns whether a key was actually removed.
    pub async fn delete(&self, key: &str) -> bool {
        let scoped = self.scoped(key);
        match self.store.delete(&scoped).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = %scoped, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Delete every key in the namespace matching a glob pattern. Returns
    /// the number deleted (0 if none match or on error).
    ///
    /// The scan is scoped to the namespace prefix, so a pattern can never
    /// reach into another namespace.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let scoped_pattern = self.scoped(pattern);

        let keys = match self.store.keys_matching(&scoped_pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern = %scoped_pattern, error = %e, "Cache pattern scan failed");
                return 0;
            }
        };

        if keys.is_empty() {
            return 0;
        }

        match self.store.delete_many(&keys).await {
            Ok(count) => {
                debug!(pattern = %scoped_pattern, count, "Deleted keys by pattern");
                count
            }
            Err(e) => {
                warn!(pattern = %scoped_pattern, error = %e, "Cache pattern delete failed");
                0
            }
        }
    }

    /// Whether a key exists (false on error).
    pub async fn exists(&self, key: &str) -> bool {
        let scoped = self.scoped(key);
        match self.store.exists(&scoped).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(key = %scoped, error = %e, "Cache exists check failed");
                false
            }
        }
    }

    /// Atomically increment a counter key, creating it at 0 if absent.
    /// Returns the value after the increment, or 0 on error.
    pub async fn increment(&self, key: &str, amount: i64) -> i64 {
        let scoped = self.scoped(key);
        match self.store.increment(&scoped, amount).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %scoped, error = %e, "Cache increment failed");
                0
            }
        }
    }

    /// Set a key's TTL (false if the key is absent or on error).
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let scoped = self.scoped(key);
        match self.store.expire(&scoped, ttl).await {
            Ok(applied) => applied,
            Err(e) => {
                warn!(key = %scoped, error = %e, "Cache expire failed");
                false
            }
        }
    }

    /// Remaining TTL of a key in seconds, or `None` on error.
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        let scoped = self.scoped(key);
        match self.store.ttl(&scoped).await {
            Ok(ttl) => Some(ttl),
            Err(e) => {
                warn!(key = %scoped, error = %e, "Cache TTL lookup failed");
                None
            }
        }
    }

    /// Delete every key in the namespace. Intended for test isolation, not
    /// production traffic.
    pub async fn flush(&self) -> u64 {
        self.delete_pattern("*").await
    }
}

fn scoped_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// Read-through cache helper.
///
/// On a hit, the cached value is returned and `fetch` is never invoked.
/// On a miss, `fetch` runs, its result is cached under `key` with the given
/// TTL, and the fresh value is returned. A failed cache write degrades to
/// returning the fetched value uncached.
pub async fn get_or_set<T, F, Fut>(
    cache: &CacheManager,
    key: &str,
    ttl: Option<Duration>,
    fetch: F,
) -> T
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if let Some(cached) = cache.get::<T>(key).await {
        return cached;
    }

    let fresh = fetch().await;
    cache.set(key, &fresh, ttl).await;
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_scoping() {
        // Scoped keys are what reach the store; two namespaces must never
        // produce the same scoped key for the same logical key.
        assert_eq!(scoped_key("org", "details:42"), "org:details:42");
        assert_ne!(
            scoped_key("org", "details:42"),
            scoped_key("user", "details:42")
        );
    }

    #[test]
    fn test_default_ttl_is_one_hour() {
        assert_eq!(DEFAULT_CACHE_TTL, Duration::from_secs(3600));
    }
}
