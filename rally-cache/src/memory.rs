//! In-memory LRU store bounded by the total size of cached bodies.
use crate::{Cache, CacheEntry, CacheError};
use async_trait::async_trait;
use lru::LruCache;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

const DEFAULT_MEMORY_BYTES: usize = 1024 * 1024;

struct MemoryInner {
    entries: LruCache<String, CacheEntry>,
    bytes: usize,
}

pub struct InMemoryCache {
    inner: Mutex<MemoryInner>,
    max_bytes: usize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MEMORY_BYTES)
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Total size of cached bodies.
    pub fn size_bytes(&self) -> usize {
        self.lock().bytes
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.lock().entries.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let size = entry.size();
        if size > self.max_bytes {
            trace!(key, size, "entry larger than the whole cache, skipped");
            return Ok(());
        }

        let mut inner = self.lock();
        if let Some(old) = inner.entries.put(key.to_string(), entry) {
            inner.bytes -= old.size();
        }
        inner.bytes += size;

        while inner.bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((evicted, old)) => {
                    inner.bytes -= old.size();
                    trace!(key = %evicted, "evicted");
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut inner = self.lock();
        if let Some(old) = inner.entries.pop(key) {
            inner.bytes -= old.size();
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.bytes = 0;
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("InMemoryCache")
            .field("entries", &inner.entries.len())
            .field("bytes", &inner.bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
