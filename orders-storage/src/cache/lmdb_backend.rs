//! LMDB-backed order cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a memory-mapped key-value
//! store. Keys are raw `order_uid` bytes; values use the layout described in
//! the [module docs](super).
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`, run inline on the caller's task
//! - Write transactions for `set`, expired-entry removal and sweeps, run on
//!   the blocking pool since LMDB serializes writers behind a mutex and
//!   commits with an fsync
//! - Statistics are tracked with atomic counters
//!
//! # Eviction
//!
//! LMDB never drops entries by itself. Expired entries are removed when a
//! read finds them, by [`OrderCache::purge_expired`], and by a sweep that
//! runs when a write reports `MDB_MAP_FULL`. That write is retried once.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, MdbError};
use orders_core::{CacheError, Order};

use super::entry::{self, CachedEntry};
use super::CacheConfig;
use crate::traits::{CacheStats, OrderCache};

fn backend_error(e: heed::Error) -> CacheError {
    CacheError::Backend(e.to_string())
}

fn join_error(e: tokio::task::JoinError) -> CacheError {
    CacheError::Backend(format!("cache write task failed: {}", e))
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    writes: AtomicU64,
    swept: AtomicU64,
}

struct LmdbInner {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    stats: StatCounters,
}

impl LmdbInner {
    fn read_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        let rtxn = self.env.read_txn().map_err(backend_error)?;
        let value = self.db.get(&rtxn, key).map_err(backend_error)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn write_raw(&self, key: &[u8], value: &[u8]) -> Result<(), heed::Error> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()
    }

    /// Write `value`, sweeping expired entries and retrying once if the map
    /// is full.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        match self.write_raw(key, value) {
            Err(heed::Error::Mdb(MdbError::MapFull)) => {
                let removed = self.sweep(Utc::now())?;
                tracing::info!(removed, "Cache map full, swept expired entries");
                self.write_raw(key, value).map_err(backend_error)
            }
            other => other.map_err(backend_error),
        }
    }

    fn remove(&self, key: &[u8]) -> Result<bool, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(backend_error)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(backend_error)?;
        wtxn.commit().map_err(backend_error)?;
        Ok(deleted)
    }

    /// Delete every entry stale at `now`.
    ///
    /// Keys are collected under a read transaction and deleted in a single
    /// write transaction, so the sweep never holds the writer lock while
    /// scanning.
    fn sweep(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let stale = {
            let rtxn = self.env.read_txn().map_err(backend_error)?;
            let mut stale = Vec::new();
            for item in self.db.iter(&rtxn).map_err(backend_error)? {
                let (key, value) = item.map_err(backend_error)?;
                if entry::is_stale(value, now) {
                    stale.push(key.to_vec());
                }
            }
            stale
        };
        if stale.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(backend_error)?;
        let mut removed = 0;
        for key in &stale {
            if self.db.delete(&mut wtxn, key).map_err(backend_error)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(backend_error)?;

        self.stats.swept.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }
}

/// LMDB-backed cache with per-entry expiry.
///
/// Cloning is cheap and shares the environment.
///
/// # Example
///
/// ```ignore
/// use orders_storage::{CacheConfig, LmdbOrderCache, OrderCache};
///
/// let cache = LmdbOrderCache::open(&CacheConfig::from_env())?;
/// cache.set(&order.order_uid, &order).await?;
/// let cached = cache.get(&order.order_uid).await?;
/// ```
#[derive(Clone)]
pub struct LmdbOrderCache {
    inner: Arc<LmdbInner>,
    /// Lifetime of every entry written by this cache.
    ttl: Duration,
}

impl LmdbOrderCache {
    /// Open (or create) the cache described by `config`.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::new(&config.path, config.max_size_mb, config.entry_ttl)
    }

    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `ttl` - Lifetime of every entry
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment/database cannot be opened.
    pub fn new<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        ttl: Duration,
    ) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&path)
            .map_err(|e| CacheError::Backend(format!("create cache dir: {}", e)))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(backend_error)?;

        let mut wtxn = env.write_txn().map_err(backend_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(backend_error)?;
        wtxn.commit().map_err(backend_error)?;

        tracing::debug!(
            path = %path.as_ref().display(),
            max_size_mb,
            ttl_secs = ttl.as_secs(),
            "LMDB order cache opened"
        );

        Ok(Self {
            inner: Arc::new(LmdbInner {
                env,
                db,
                stats: StatCounters::default(),
            }),
            ttl,
        })
    }

    /// Lifetime applied to new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current usage statistics.
    pub fn stats(&self) -> CacheStats {
        let stats = &self.inner.stats;
        CacheStats {
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            expired: stats.expired.load(Ordering::Relaxed),
            writes: stats.writes.load(Ordering::Relaxed),
            swept: stats.swept.load(Ordering::Relaxed),
        }
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbInner) -> Result<T, CacheError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(join_error)?
    }
}

#[async_trait]
impl OrderCache for LmdbOrderCache {
    async fn set(&self, order_uid: &str, order: &Order) -> Result<(), CacheError> {
        let bytes = entry::encode(order, Utc::now(), self.ttl)?;
        let key = order_uid.as_bytes().to_vec();
        self.blocking(move |inner| inner.put(&key, &bytes)).await?;
        self.inner.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError> {
        let stats = &self.inner.stats;
        let Some(bytes) = self.inner.read_raw(order_uid.as_bytes())? else {
            stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match entry::decode(&bytes, Utc::now())? {
            CachedEntry::Live(order) => {
                stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(order))
            }
            CachedEntry::Expired => {
                stats.expired.fetch_add(1, Ordering::Relaxed);
                stats.misses.fetch_add(1, Ordering::Relaxed);
                let key = order_uid.as_bytes().to_vec();
                if let Err(e) = self.blocking(move |inner| inner.remove(&key)).await {
                    tracing::debug!(order_uid, error = %e, "failed to drop expired cache entry");
                }
                Ok(None)
            }
        }
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.blocking(|inner| inner.sweep(Utc::now())).await
    }
}
