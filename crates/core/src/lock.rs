//! In-process mutual exclusion keyed by string.
//!
//! Used to serialize downloads of the same URL and extraction of the same
//! fingerprint. Entries are dropped from the table once nobody holds or waits
//! for them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type LockTable = HashMap<String, Arc<AsyncMutex<()>>>;

/// A table of async mutexes, one per key.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    table: Arc<Mutex<LockTable>>,
}

impl KeyedLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let entry = {
            let mut table = self.table.lock();
            Arc::clone(table.entry(key.to_string()).or_default())
        };
        trace!(key, "Waiting for keyed lock");
        let mut waiter = Waiter {
            key,
            table: &self.table,
            waiting: true,
        };
        let guard = entry.lock_owned().await;
        waiter.waiting = false;
        KeyedGuard {
            guard: Some(guard),
            key: key.to_string(),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether no key is held or waited on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

/// Prunes the entry of a waiter that is dropped before acquiring its key.
struct Waiter<'a> {
    key: &'a str,
    table: &'a Mutex<LockTable>,
    waiting: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.waiting {
            trace!(key = self.key, "Keyed lock wait abandoned");
            remove_if_unused(&mut self.table.lock(), self.key);
        }
    }
}

/// Exclusive access to one key of a [`KeyedLocks`] table.
#[derive(Debug)]
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    table: Arc<Mutex<LockTable>>,
}

impl KeyedGuard {
    /// The key this guard holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        drop(self.guard.take());
        remove_if_unused(&mut table, &self.key);
    }
}

// Only the table itself still references the mutex: nobody holds or waits.
fn remove_if_unused(table: &mut LockTable, key: &str) {
    if table
        .get(key)
        .is_some_and(|entry| Arc::strong_count(entry) == 1)
    {
        table.remove(key);
    }
}
