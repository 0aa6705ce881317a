//! Cache facade used by the API fetchers
//!
//! Provides a cloneable `Cache` handle with typed `get`/`set` over the durable store.
//! Staleness is decided by each entry's expiry timestamp; recency only matters for
//! choosing eviction victims.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::store::{now_ms, CacheEntry, DurableStore};

/// File name of the on-disk snapshot
pub const SNAPSHOT_FILE_NAME: &str = "cache.json";

/// Returns the default snapshot path inside the per-user data directory
///
/// Uses `~/.local/share/codeforce/cache.json` on Linux, or the platform equivalent.
/// Returns `None` if no home directory can be determined.
pub fn default_snapshot_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "codeforce").map(|dirs| dirs.data_dir().join(SNAPSHOT_FILE_NAME))
}

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Location of the snapshot file
    pub path: PathBuf,
    /// How long a written entry stays valid
    pub ttl: Duration,
    /// Maximum number of resident entries
    pub max_entries: usize,
    /// Size ceiling for the snapshot file in bytes
    pub max_snapshot_bytes: u64,
    /// Fraction of entries dropped when the snapshot is over budget
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path().unwrap_or_else(|| PathBuf::from(SNAPSHOT_FILE_NAME)),
            ttl: Duration::from_secs(3600),       // 1 hour
            max_entries: 500,
            max_snapshot_bytes: 100 * 1024 * 1024, // 100 MiB
            eviction_fraction: 0.2,
        }
    }
}

impl CacheConfig {
    /// Default configuration with the snapshot stored in `dir`
    ///
    /// Useful for testing or when a specific cache location is needed.
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SNAPSHOT_FILE_NAME),
            ..Self::default()
        }
    }
}

/// Typed, TTL-aware handle to the shared response cache
///
/// Cloning is cheap; all clones share one store and one snapshot file.
#[derive(Clone)]
pub struct Cache {
    store: Arc<DurableStore>,
    ttl: Duration,
}

impl Cache {
    /// Opens the cache, loading unexpired entries from the snapshot file
    pub fn open(config: CacheConfig) -> Self {
        Self {
            store: Arc::new(DurableStore::open(&config)),
            ttl: config.ttl,
        }
    }

    /// Reads a live value from the cache
    ///
    /// # Arguments
    /// * `key` - The cache key, conventionally the un-paginated request path
    ///
    /// # Returns
    /// * `Some(T)` if an unexpired entry exists and decodes as `T`
    /// * `None` if the entry is missing, expired or has a different shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.store.get(key, now_ms())?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(err) => {
                debug!(key, error = %err, "cached value has unexpected shape, treating as miss");
                None
            }
        }
    }

    /// Records a value in memory and schedules a background persist
    ///
    /// Returning means the value is in memory; the snapshot write is best-effort
    /// and its failures are only logged.
    ///
    /// # Arguments
    /// * `key` - The cache key to write
    /// * `data` - The value to cache (must implement Serialize)
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T) {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "value cannot be cached");
                return;
            }
        };

        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            value,
            expires: now_ms().saturating_add(ttl_ms),
        };
        self.store.insert(key.to_string(), entry);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = Arc::clone(&self.store);
                runtime.spawn(async move { store.persist().await });
            }
            Err(_) => debug!(key, "no async runtime, skipping background persist"),
        }
    }

    /// Writes the current state to disk and waits for it to finish
    ///
    /// Call on shutdown so the latest writes survive a restart. Unlike the
    /// background persists, a flush waits out a running eviction pass.
    pub async fn flush(&self) {
        self.store.flush().await;
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether a key is resident, without touching its recency
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        self.store.path()
    }
}
