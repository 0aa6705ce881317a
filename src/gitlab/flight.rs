//! Per-key request coalescing
//!
//! Concurrent misses on the same cache key take turns on a shared async lock, so
//! the second caller finds the first caller's result in the cache instead of
//! repeating the whole upstream walk.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

/// Registry of keys with a fetch in progress
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl InFlight {
    /// Registers interest in `key`, sharing the lock with other callers
    pub(crate) fn join(&self, key: &str) -> Ticket {
        let lock = Arc::clone(self.locks.lock().entry(key.to_string()).or_default());
        Ticket {
            in_flight: self.clone(),
            key: key.to_string(),
            lock,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// A caller's place in line for one key; the registry entry goes with the last ticket
pub(crate) struct Ticket {
    in_flight: InFlight,
    key: String,
    lock: Arc<AsyncMutex<()>>,
}

impl Ticket {
    /// Waits until no other caller holds this key
    pub(crate) async fn turn(&self) -> AsyncMutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut locks = self.in_flight.locks.lock();
        // One reference in the registry plus ours means nobody else is waiting
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_ticket_removes_key() {
        let in_flight = InFlight::default();

        let first = in_flight.join("/projects");
        let second = in_flight.join("/projects");
        assert_eq!(in_flight.len(), 1);

        drop(first);
        assert_eq!(in_flight.len(), 1);

        drop(second);
        assert_eq!(in_flight.len(), 0);
    }

    #[tokio::test]
    async fn test_turns_are_exclusive_per_key() {
        let in_flight = InFlight::default();
        let first = in_flight.join("a");
        let second = in_flight.join("a");
        let other = in_flight.join("b");

        let _held = first.turn().await;
        assert!(second.lock.try_lock().is_err());
        assert!(other.lock.try_lock().is_ok());
    }
}
