//! Cache module for storing API responses across runs
//!
//! This module provides a TTL-aware, size-bounded response cache. Entries live in a
//! recency-ordered in-memory map that is mirrored to a single JSON snapshot file, so
//! a fresh process starts warm. Disk failures never surface to callers: the cache
//! simply degrades to more upstream requests.

mod manager;
mod store;

pub use manager::{default_snapshot_path, Cache, CacheConfig, SNAPSHOT_FILE_NAME};
pub use store::{CacheEntry, CacheError, DurableStore};
