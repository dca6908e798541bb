//! Cache Expiry Sweep
//!
//! Expired cache entries are only removed when a read finds them, so entries
//! that are never read again would hold their space forever. This task calls
//! [`OrderCache::purge_expired`] on a fixed period until shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orders_storage::OrderCache;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the sweep task.
#[derive(Debug, Default)]
pub struct CacheSweepMetrics {
    pub runs: AtomicU64,
    pub removed: AtomicU64,
    pub errors: AtomicU64,
}

/// Point-in-time copy of [`CacheSweepMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSweepSnapshot {
    pub runs: u64,
    pub removed: u64,
    pub errors: u64,
}

impl CacheSweepMetrics {
    pub fn snapshot(&self) -> CacheSweepSnapshot {
        CacheSweepSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// TASK
// ============================================================================

/// Sweep `cache` every `period` until `shutdown_rx` flips to true.
///
/// A zero period returns at once. Sweep failures are logged and counted;
/// the next tick tries again.
pub async fn cache_sweep_task(
    cache: Arc<dyn OrderCache>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> CacheSweepSnapshot {
    let metrics = CacheSweepMetrics::default();
    if period.is_zero() {
        tracing::info!("Cache expiry sweep disabled");
        return metrics.snapshot();
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(period_secs = period.as_secs(), "Cache expiry sweep started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache expiry sweep shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                metrics.runs.fetch_add(1, Ordering::Relaxed);
                match cache.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => {
                        metrics.removed.fetch_add(removed as u64, Ordering::Relaxed);
                        tracing::debug!(removed, "Swept expired cache entries");
                    }
                    Err(e) => {
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "Cache expiry sweep failed");
                    }
                }
            }
        }
    }

    metrics.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orders_storage::InMemoryOrderCache;
    use orders_test_utils::fixtures::sample_order;

    #[tokio::test]
    async fn test_sweeps_expired_entries_until_shutdown() {
        let cache = Arc::new(InMemoryOrderCache::new(Duration::from_millis(5)));
        for uid in ["a", "b", "c"] {
            cache.set(uid, &sample_order(uid)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(cache_sweep_task(
            cache.clone(),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !cache.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.is_empty());

        shutdown_tx.send(true).unwrap();
        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.removed, 3);
        assert_eq!(snapshot.errors, 0);
        assert!(snapshot.runs >= 1);
    }

    #[tokio::test]
    async fn test_zero_period_returns_immediately() {
        let cache: Arc<dyn OrderCache> = Arc::new(InMemoryOrderCache::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let snapshot = cache_sweep_task(cache, Duration::ZERO, shutdown_rx).await;
        assert_eq!(snapshot, CacheSweepSnapshot::default());
    }
}
