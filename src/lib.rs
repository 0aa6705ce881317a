//! codeforce library
//!
//! GitLab contribution metrics on top of a disk-persisted LRU/TTL response cache.
//! The modules are public for use by the binary and integration tests.

pub mod cache;
pub mod cli;
pub mod gitlab;
pub mod logging;
pub mod metrics;
