//! File-per-key store under a root directory.
//!
//! Record layout: `[u32 BE header length][JSON header][body bytes]`. The header
//! carries the original key (file names are md5 digests) and the entry
//! metadata. An LRU index of record sizes lives in memory and is rebuilt from
//! the directory by `initialize`.
use crate::{Cache, CacheEntry, CacheError};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::{fs, io::AsyncReadExt};
use tracing::{debug, warn};

const DEFAULT_DISK_USAGE_BYTES: u64 = 5 * 1024 * 1024;
/// Pruning stops once usage drops under this share of the budget.
const HYSTERESIS_FACTOR: f64 = 0.9;
const HEADER_LEN_BYTES: usize = 4;

#[derive(Serialize)]
struct RecordHeaderRef<'a> {
    key: &'a str,
    entry: &'a CacheEntry,
}

#[derive(Deserialize)]
struct RecordHeader {
    key: String,
    entry: CacheEntry,
}

struct DiskIndex {
    sizes: LruCache<String, u64>,
    total: u64,
}

impl DiskIndex {
    fn insert(&mut self, key: String, size: u64) {
        if let Some(old) = self.sizes.put(key, size) {
            self.total -= old;
        }
        self.total += size;
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.sizes.pop(key) {
            self.total -= old;
        }
    }
}

pub struct DiskCache {
    root: PathBuf,
    max_bytes: u64,
    index: Mutex<DiskIndex>,
}

fn encode(key: &str, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
    let header = serde_json::to_vec(&RecordHeaderRef { key, entry })
        .map_err(|e| CacheError::Serialization(e.to_string()))?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| CacheError::Serialization("header too large".into()))?;

    let mut record =
        Vec::with_capacity(HEADER_LEN_BYTES + header.len() + entry.data.len());
    record.extend_from_slice(&header_len.to_be_bytes());
    record.extend_from_slice(&header);
    record.extend_from_slice(&entry.data);
    Ok(record)
}

fn decode(record: &[u8]) -> Result<(String, CacheEntry), CacheError> {
    let (len_bytes, rest) = record
        .split_first_chunk::<HEADER_LEN_BYTES>()
        .ok_or_else(|| CacheError::Corrupted("truncated record".into()))?;
    let header_len = u32::from_be_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(CacheError::Corrupted("header length out of bounds".into()));
    }
    let (header, body) = rest.split_at(header_len);
    let RecordHeader { key, mut entry } = serde_json::from_slice(header)
        .map_err(|e| CacheError::Deserialization(e.to_string()))?;
    entry.data = body.to_vec();
    Ok((key, entry))
}

async fn read_header(path: &Path) -> Result<String, CacheError> {
    let mut file = fs::File::open(path).await?;
    let file_len = file.metadata().await?.len();
    let mut len_bytes = [0u8; HEADER_LEN_BYTES];
    file.read_exact(&mut len_bytes).await?;
    let header_len = u64::from(u32::from_be_bytes(len_bytes));
    // the prefix is untrusted; never allocate past the file itself
    if header_len > file_len.saturating_sub(HEADER_LEN_BYTES as u64) {
        return Err(CacheError::Corrupted("header length out of bounds".into()));
    }
    let mut header = vec![0u8; header_len as usize];
    file.read_exact(&mut header).await?;
    let RecordHeader { key, .. } = serde_json::from_slice(&header)
        .map_err(|e| CacheError::Deserialization(e.to_string()))?;
    Ok(key)
}

async fn remove_file(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_bytes(root, DEFAULT_DISK_USAGE_BYTES)
    }

    pub fn with_max_bytes(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
            index: Mutex::new(DiskIndex {
                sizes: LruCache::unbounded(),
                total: 0,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn size_bytes(&self) -> u64 {
        self.lock().total
    }

    fn lock(&self) -> MutexGuard<'_, DiskIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_for_key(&self, key: &str) -> PathBuf {
        self.root.join(format!("{:x}", md5::compute(key.as_bytes())))
    }

    /// Frees room for `needed` more bytes, oldest entries first.
    async fn prune_if_needed(&self, needed: u64) {
        let victims: Vec<String> = {
            let mut index = self.lock();
            if index.total + needed < self.max_bytes {
                return;
            }
            let target = (self.max_bytes as f64 * HYSTERESIS_FACTOR) as u64;
            let mut victims = Vec::new();
            while index.total + needed >= target {
                match index.sizes.pop_lru() {
                    Some((key, size)) => {
                        index.total -= size;
                        victims.push(key);
                    }
                    None => break,
                }
            }
            victims
        };

        for key in &victims {
            if let Err(e) = remove_file(&self.file_for_key(key)).await {
                warn!(key = %key, error = %e, "failed to delete pruned cache file");
            }
        }
        debug!(pruned = victims.len(), "disk cache pruned");
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn initialize(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root).await?;

        let mut found = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let size = item.metadata().await?.len();
            match read_header(&path).await {
                Ok(key) => found.push((key, size)),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "dropping unreadable cache file"
                    );
                    remove_file(&path).await?;
                }
            }
        }

        let mut index = self.lock();
        for (key, size) in found {
            index.insert(key, size);
        }
        debug!(
            entries = index.sizes.len(),
            bytes = index.total,
            "disk cache initialized"
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if self.lock().sizes.get(key).is_none() {
            return Ok(None);
        }

        let path = self.file_for_key(key);
        let record = match fs::read(&path).await {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.lock().remove(key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match decode(&record) {
            // md5 collision: the file belongs to another key
            Ok((stored_key, _)) if stored_key != key => Ok(None),
            Ok((_, entry)) => Ok(Some(entry)),
            Err(e) => {
                warn!(key, error = %e, "corrupted cache record removed");
                self.lock().remove(key);
                remove_file(&path).await?;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let record = encode(key, &entry)?;
        let size = record.len() as u64;
        self.prune_if_needed(size).await;

        fs::create_dir_all(&self.root).await?;
        let path = self.file_for_key(key);
        if let Err(e) = fs::write(&path, &record).await {
            remove_file(&path).await?;
            self.lock().remove(key);
            return Err(e.into());
        }
        self.lock().insert(key.to_string(), size);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.lock().remove(key);
        remove_file(&self.file_for_key(key)).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let keys: Vec<String> = {
            let mut index = self.lock();
            let keys = index.sizes.iter().map(|(k, _)| k.clone()).collect();
            index.sizes.clear();
            index.total = 0;
            keys
        };
        for key in keys {
            remove_file(&self.file_for_key(&key)).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.lock();
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .field("entries", &index.sizes.len())
            .field("bytes", &index.total)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
