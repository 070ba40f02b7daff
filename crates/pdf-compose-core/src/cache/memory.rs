use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use std::path::PathBuf;
use std::time::Duration;

use super::{CacheKey, ContentCache};
use crate::error::Result;

/// In-memory cache using moka with byte-size-based eviction.
pub struct MemoryCache {
    cache: Cache<String, Bytes>,
}

impl MemoryCache {
    pub fn new(max_mb: u64, ttl_seconds: u64) -> Self {
        let max_bytes = max_mb.saturating_mul(1024 * 1024);

        let mut builder = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &String, value: &Bytes| -> u32 {
                // Weight is the value byte size, capped at u32::MAX
                value.len().try_into().unwrap_or(u32::MAX)
            });

        if ttl_seconds > 0 {
            builder = builder.time_to_live(Duration::from_secs(ttl_seconds));
        }

        Self {
            cache: builder.build(),
        }
    }
}

#[async_trait]
impl ContentCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.cache.get(key.as_str()).await
    }

    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<Option<PathBuf>> {
        self.cache.insert(key.to_string(), value).await;
        Ok(None)
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.cache.remove(key.as_str()).await;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        Ok(())
    }
}
