//! Storage and cache capability traits.
//!
//! The order service only ever sees these two traits. Concrete adapters are
//! injected at startup, which keeps the service testable against in-memory
//! fakes.

use async_trait::async_trait;
use orders_core::{CacheError, Order, StorageError};

/// Durable store for the composite order record.
///
/// # Contract
///
/// - `save_order` writes the header, delivery, payment and every item as one
///   atomic unit. On any failure nothing for that `order_uid` is visible.
///   An existing identifier yields [`StorageError::Duplicate`].
/// - `get_order_by_id` rebuilds the full aggregate with items in ascending
///   `chrt_id` order, or returns [`StorageError::NotFound`]. It never returns
///   a zero-valued order.
#[async_trait]
pub trait OrderStorage: Send + Sync {
    /// Persist a new order.
    async fn save_order(&self, order: &Order) -> Result<(), StorageError>;

    /// Load an order by identifier.
    async fn get_order_by_id(&self, order_uid: &str) -> Result<Order, StorageError>;
}

/// Best-effort key-value cache of serialized orders.
///
/// `Ok(None)` is a clean miss (absent or expired). `Err` is a malfunction
/// that callers treat as a miss and log; it is never fatal.
#[async_trait]
pub trait OrderCache: Send + Sync {
    /// Store a snapshot under `order_uid`, replacing any previous entry.
    async fn set(&self, order_uid: &str, order: &Order) -> Result<(), CacheError>;

    /// Look up a snapshot.
    async fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError>;

    /// Drop every entry past its expiry and return how many were removed.
    ///
    /// Backends that evict on their own can keep the default.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of clean misses, expired entries included.
    pub misses: u64,
    /// Number of entries found but past their expiry.
    pub expired: u64,
    /// Number of successful writes.
    pub writes: u64,
    /// Number of expired entries removed by sweeps.
    pub swept: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
