mod memory;
mod disk;
mod key;

pub use memory::MemoryCache;
pub use disk::DiskCache;
pub use key::CacheKey;

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::Result;

/// A storage backend for fetched and rendered resources.
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> Option<Bytes>;

    /// Store `value`; file-backed stores return where it was written.
    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<Option<PathBuf>>;

    async fn remove(&self, key: &CacheKey) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Layered resource cache: backends are consulted in order, and a hit in a
/// later tier back-fills the earlier ones.
#[derive(Clone)]
pub struct ResourceCache {
    tiers: Vec<Arc<dyn ContentCache>>,
}

impl ResourceCache {
    /// Create a resource cache from configuration
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let mut tiers: Vec<Arc<dyn ContentCache>> = Vec::new();

        if config.memory_enabled {
            tiers.push(Arc::new(MemoryCache::new(
                config.memory_max_mb,
                config.memory_ttl_seconds,
            )));
        }

        if config.disk_enabled {
            tiers.push(Arc::new(DiskCache::new(config.disk_dir())?));
        }

        Ok(Self { tiers })
    }

    /// Build from explicit backends, consulted in the given order.
    pub fn with_backends(tiers: Vec<Arc<dyn ContentCache>>) -> Self {
        Self { tiers }
    }

    /// A cache that stores nothing; every lookup misses.
    pub const fn disabled() -> Self {
        Self { tiers: Vec::new() }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Some(value) = tier.get(key).await {
                debug!("Cache hit for {} in {} cache", key, tier.name());
                for earlier in &self.tiers[..index] {
                    if let Err(e) = earlier.put(key, value.clone()).await {
                        warn!("Failed to back-fill {} cache: {}", earlier.name(), e);
                    }
                }
                return Some(value);
            }
        }
        None
    }

    /// Store in every tier. Returns the file path if any tier is file-backed.
    pub async fn insert(&self, key: &CacheKey, value: Bytes) -> Result<Option<PathBuf>> {
        let mut path = None;
        for tier in &self.tiers {
            if let Some(p) = tier.put(key, value.clone()).await? {
                path = Some(p);
            }
        }
        Ok(path)
    }

    /// Return the cached value for `key`, or run `fetch`, persist its result
    /// and return it. The flag is `true` on a cache hit.
    pub async fn ensure_cached<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<(Bytes, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok((value, true));
        }

        let value = fetch().await?;
        self.insert(key, value.clone()).await?;
        Ok((value, false))
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<()> {
        for tier in &self.tiers {
            tier.remove(key).await?;
        }
        Ok(())
    }

    /// Clear all caches
    pub async fn clear(&self) {
        for tier in &self.tiers {
            if let Err(e) = tier.clear().await {
                warn!("Failed to clear {} cache: {}", tier.name(), e);
            }
        }
    }
}
