//! Durable entry store backing the response cache
//!
//! Owns the authoritative recency-ordered map of entries and its on-disk mirror.
//! The snapshot is a single JSON object of `key -> { value, expires }` records,
//! where `expires` is a Unix timestamp in milliseconds.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::CacheConfig;

/// Errors raised while reading or writing the snapshot file
///
/// These never escape the cache: they are logged and the in-memory map stays
/// the source of truth.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem access failed
    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Snapshot content could not be (de)serialized
    #[error("invalid cache snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// A cached value together with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload
    pub value: Value,
    /// Unix timestamp in milliseconds at which the entry becomes stale
    pub expires: i64,
}

impl CacheEntry {
    /// Whether the entry is stale at the given instant (`now >= expires`)
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires
    }
}

/// Current wall-clock time as Unix milliseconds
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Resets the eviction flag even if the persisting future is dropped mid-pass.
struct EvictionGuard<'a>(&'a AtomicBool);

impl Drop for EvictionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// In-memory LRU map of cache entries mirrored to a JSON snapshot file
pub struct DurableStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
    path: PathBuf,
    max_snapshot_bytes: u64,
    eviction_fraction: f64,
    /// Serializes snapshot writes so a later persist never loses to an earlier one.
    write_lock: tokio::sync::Mutex<()>,
    evicting: AtomicBool,
}

impl DurableStore {
    /// Opens the store, loading any unexpired entries from the snapshot file
    ///
    /// A missing, empty, unreadable or corrupt snapshot yields an empty store.
    /// A corrupt file is left in place and replaced by the next successful persist.
    pub fn open(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        let mut entries = LruCache::new(capacity);

        match read_snapshot(&config.path) {
            Ok(snapshot) => {
                let now = now_ms();
                let mut expired = 0;
                for (key, entry) in snapshot {
                    if entry.is_expired_at(now) {
                        expired += 1;
                    } else {
                        entries.put(key, entry);
                    }
                }
                debug!(
                    path = %config.path.display(),
                    loaded = entries.len(),
                    expired,
                    "loaded cache snapshot"
                );
            }
            Err(err) => {
                warn!(path = %config.path.display(), error = %err, "ignoring unreadable cache snapshot");
            }
        }

        Self {
            entries: Mutex::new(entries),
            path: config.path.clone(),
            max_snapshot_bytes: config.max_snapshot_bytes,
            eviction_fraction: config.eviction_fraction,
            write_lock: tokio::sync::Mutex::new(()),
            evicting: AtomicBool::new(false),
        }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of resident entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no entries are resident
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether a key is resident, without touching its recency
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    /// Resident keys from most to least recently used
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    /// Looks up a live entry, marking it as recently used
    ///
    /// An entry that has expired is dropped from memory and reported as absent.
    pub fn get(&self, key: &str, now_ms: i64) -> Option<Value> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired_at(now_ms) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Records an entry in memory, replacing any previous entry for the key
    ///
    /// When the store is at capacity the least recently used entry is evicted first.
    pub fn insert(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!(key = %evicted, "evicted least recently used cache entry");
            }
        }
    }

    /// Writes the snapshot, then enforces the on-disk size budget
    ///
    /// If the written snapshot exceeds the byte ceiling, the least recently used
    /// fraction of entries is dropped and the snapshot is written once more without
    /// re-checking the budget. Requests that arrive while that eviction pass runs
    /// are dropped; the next write persists again. Failures are only logged.
    pub async fn persist(&self) {
        if self.evicting.load(Ordering::Acquire) {
            debug!("eviction pass in flight, dropping persist request");
            return;
        }

        let write = self.write_lock.lock().await;
        self.persist_locked(write).await;
    }

    /// Like `persist`, but waits for a running eviction pass instead of being dropped
    pub async fn flush(&self) {
        let write = self.write_lock.lock().await;
        self.persist_locked(write).await;
    }

    async fn persist_locked(&self, _write: tokio::sync::MutexGuard<'_, ()>) {
        let size = match self.write_snapshot().await {
            Ok(size) => size,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to persist cache snapshot");
                return;
            }
        };

        if size <= self.max_snapshot_bytes {
            return;
        }

        if self.evicting.swap(true, Ordering::AcqRel) {
            return;
        }
        let _evicting = EvictionGuard(&self.evicting);

        let removed = self.evict_least_recent();
        debug!(
            size,
            limit = self.max_snapshot_bytes,
            removed,
            "cache snapshot over budget, evicted least recently used entries"
        );

        if let Err(err) = self.write_snapshot().await {
            warn!(path = %self.path.display(), error = %err, "failed to persist cache snapshot after eviction");
        }
    }

    /// Drops `ceil(len * eviction_fraction)` least recently used entries, at least one
    fn evict_least_recent(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        if count == 0 {
            return 0;
        }

        let remove = ((count as f64) * self.eviction_fraction).ceil() as usize;
        let remove = remove.clamp(1, count);
        for _ in 0..remove {
            entries.pop_lru();
        }
        remove
    }

    /// Serializes memory to a temp file and renames it over the snapshot
    ///
    /// Returns the size of the snapshot file after the write.
    async fn write_snapshot(&self) -> Result<u64, CacheError> {
        let json = {
            let entries = self.entries.lock();
            let snapshot: HashMap<&String, &CacheEntry> = entries.iter().collect();
            serde_json::to_vec_pretty(&snapshot)?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        Ok(tokio::fs::metadata(&self.path).await?.len())
    }
}

/// Reads the snapshot file; missing or blank files are an empty snapshot
fn read_snapshot(path: &Path) -> Result<HashMap<String, CacheEntry>, CacheError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };

    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }

    Ok(serde_json::from_str(&content)?)
}
