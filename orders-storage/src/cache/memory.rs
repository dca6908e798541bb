//! In-process order cache.
//!
//! Stores entries in the same byte layout as the LMDB backend, so expiry and
//! corruption behave identically. Used by tests and when no cache directory
//! is available.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use orders_core::{CacheError, Order};

use super::entry::{self, CachedEntry};
use super::DEFAULT_ENTRY_TTL;
use crate::traits::{CacheStats, OrderCache};

/// Cache backed by a `HashMap` behind a `RwLock`.
#[derive(Debug)]
pub struct InMemoryOrderCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    ttl: Duration,
    fail_sets: AtomicBool,
    fail_gets: AtomicBool,
    get_calls: AtomicU64,
    set_calls: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    writes: AtomicU64,
    swept: AtomicU64,
}

impl Default for InMemoryOrderCache {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_TTL)
    }
}

impl InMemoryOrderCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            fail_sets: AtomicBool::new(false),
            fail_gets: AtomicBool::new(false),
            get_calls: AtomicU64::new(0),
            set_calls: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Make every subsequent `set` fail with a backend error.
    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `get` fail with a backend error.
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Store raw bytes under `key`, bypassing encoding.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::Backend("cache lock poisoned".into()))?;
        entries.insert(key.to_string(), bytes);
        Ok(())
    }

    /// Whether an entry (live or not) is held under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl OrderCache for InMemoryOrderCache {
    async fn set(&self, order_uid: &str, order: &Order) -> Result<(), CacheError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected set failure".into()));
        }

        let bytes = entry::encode(order, Utc::now(), self.ttl)?;
        self.insert_raw(order_uid, bytes)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected get failure".into()));
        }

        let bytes = {
            let entries = self
                .entries
                .read()
                .map_err(|_| CacheError::Backend("cache lock poisoned".into()))?;
            entries.get(order_uid).cloned()
        };

        let Some(bytes) = bytes else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match entry::decode(&bytes, Utc::now())? {
            CachedEntry::Live(order) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(order))
            }
            CachedEntry::Expired => {
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut entries) = self.entries.write() {
                    entries.remove(order_uid);
                }
                Ok(None)
            }
        }
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::Backend("cache lock poisoned".into()))?;
        let before = entries.len();
        entries.retain(|_, bytes| !entry::is_stale(bytes, now));
        let removed = before - entries.len();
        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }
}
