//! Cache layer
//!
//! Taxonomy lists (departments, courses, exam names) are read on nearly every
//! page and change rarely, so the services keep them in an in-process cache
//! and invalidate by key pattern on writes.
//!
//! ```rust,ignore
//! use examvault::cache::{create_cache, CacheLayer};
//!
//! let cache = create_cache(&config.cache).await?;
//! cache.set("taxonomy:departments:all", &departments, ttl).await?;
//! cache.delete_pattern("taxonomy:departments:*").await?;
//! ```

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CacheDriver};

pub use memory::MemoryCache;

/// Operations every cache backend provides.
///
/// The generic methods make this trait unusable as `dyn CacheLayer`; the
/// [`Cache`] enum is the runtime-selected handle instead.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key matching a glob pattern (`*` and `?`)
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Debug)]
pub enum Cache {
    Memory(MemoryCache),
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete_pattern(pattern).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.clear().await,
        }
    }
}

impl Cache {
    /// Default TTL configured for this cache
    pub fn default_ttl(&self) -> Duration {
        match self {
            Cache::Memory(cache) => cache.default_ttl(),
        }
    }
}

/// Build the cache selected by `config.driver`.
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<Cache>> {
    let ttl = Duration::from_secs(config.ttl_seconds);

    match config.driver {
        CacheDriver::Memory => {
            let cache = MemoryCache::with_capacity_and_ttl(config.max_capacity, ttl);
            tracing::debug!(
                "Memory cache ready (capacity {}, ttl {:?})",
                config.max_capacity,
                ttl
            );
            Ok(Arc::new(Cache::Memory(cache)))
        }
    }
}

/// Fresh cache for tests
pub fn create_test_cache() -> Arc<Cache> {
    Arc::new(Cache::Memory(MemoryCache::new()))
}
