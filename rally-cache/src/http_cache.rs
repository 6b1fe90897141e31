use crate::{CacheEntry, CacheError};
use async_trait::async_trait;

/// Key to entry store consumed by the dispatchers. Eviction is up to the store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Prepare the store (e.g. scan a directory). Called once by the cache
    /// dispatcher before it takes its first request.
    async fn initialize(&self) -> Result<(), CacheError> {
        Ok(())
    }

    /// Get an entry from the cache
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Add or replace an entry
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Mark an entry as needing refresh, or as unusable with `full_expire`
    async fn invalidate(
        &self,
        key: &str,
        full_expire: bool,
    ) -> Result<(), CacheError> {
        if let Some(mut entry) = self.get(key).await? {
            entry.invalidate(full_expire);
            self.put(key, entry).await?;
        }
        Ok(())
    }

    /// Remove an entry
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Drop everything
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Cache that never stores anything; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _entry: CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
