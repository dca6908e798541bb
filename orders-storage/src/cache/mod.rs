//! Order cache with a fixed time-to-live.
//!
//! Every entry carries its own expiry, so an entry is either live or reported
//! as a miss. The cache is never the source of truth: callers fall back to
//! storage on any miss or malfunction.
//!
//! # Entry Layout
//!
//! ```text
//! [expires_at: i64 millis, little-endian][order as JSON]
//! ```
//!
//! Both backends share this layout so a corrupted entry behaves the same way
//! everywhere.

pub mod entry;
pub mod lmdb_backend;
pub mod memory;

use std::path::PathBuf;
use std::time::Duration;

pub use lmdb_backend::LmdbOrderCache;
pub use memory::InMemoryOrderCache;

/// Default lifetime of a cached order.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(3600);

/// Default period of the background expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Configuration for the order cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// Maximum size of the LMDB map in megabytes.
    pub max_size_mb: usize,
    /// TTL for cached entries.
    pub entry_ttl: Duration,
    /// Period of the background expiry sweep. Zero disables it.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/order-cache"),
            max_size_mb: 256,
            entry_ttl: DEFAULT_ENTRY_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_PATH`: LMDB directory (default: ./data/order-cache)
    /// - `CACHE_MAX_SIZE_MB`: map size in megabytes (default: 256)
    /// - `CACHE_TTL_SECS`: entry lifetime (default: 3600)
    /// - `CACHE_SWEEP_INTERVAL_SECS`: expiry sweep period, 0 to disable (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            path: std::env::var("CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size_mb: std::env::var("CACHE_MAX_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size_mb),
            entry_ttl: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.entry_ttl),
            sweep_interval: std::env::var("CACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Set the cache directory.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the map size.
    pub fn with_max_size_mb(mut self, max_size_mb: usize) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Set the expiry sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
