//! Cache service abstraction
//!
//! The token validator, the OAuth state store and the DPoP replay guard all
//! talk to a [`CacheService`]. Production deployments plug in a shared store;
//! [`MemoryCache`] is the in-process implementation used by single-node
//! gateways and by the test suite.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use crate::error::Result;

/// Key/value cache with per-entry TTL
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Store `value` only when `key` is absent; `true` when this call inserted it.
    ///
    /// The default is not atomic, see [`CacheService::take`].
    async fn set_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value, ttl_seconds).await?;
        Ok(true)
    }

    /// Read and delete an entry.
    ///
    /// The default is not atomic. Implementations shared between tasks must
    /// override it with a single check-and-delete operation.
    async fn take(&self, key: &str) -> Result<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.del(key).await?;
        }
        Ok(value)
    }
}

#[derive(Clone)]
struct CachedValue {
    value: String,
    ttl: Duration,
}

struct PerEntryExpiry;

impl Expiry<String, CachedValue> for PerEntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &CachedValue, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache backed by moka
#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, CachedValue>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryExpiry)
            .build();
        Self { inner }
    }

    /// Number of live entries (approximate until pending tasks run)
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl CacheService for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let entry = CachedValue {
            value: value.to_string(),
            ttl: Duration::from_secs(ttl_seconds),
        };
        self.inner.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.remove(key).await.map(|entry| entry.value))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let entry = CachedValue {
            value: value.to_string(),
            ttl: Duration::from_secs(ttl_seconds),
        };
        let inserted = self
            .inner
            .entry(key.to_string())
            .or_insert_with(async move { entry })
            .await
            .is_fresh();
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_del() {
        let cache = MemoryCache::default();
        cache.set("k", "v", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.del("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let cache = MemoryCache::default();
        cache.set("state", "payload", 60).await.unwrap();

        assert_eq!(cache.take("state").await.unwrap().as_deref(), Some("payload"));
        assert!(cache.take("state").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_take_has_one_winner() {
        let cache = Arc::new(MemoryCache::default());
        cache.set("once", "x", 60).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.take("once").await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_concurrent_set_if_absent_has_one_winner() {
        let cache = Arc::new(MemoryCache::default());

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set_if_absent("jti", &i.to_string(), 60).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(!cache.set_if_absent("jti", "late", 60).await.unwrap());
    }
}
