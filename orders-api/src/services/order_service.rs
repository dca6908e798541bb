//! Order read and write paths.
//!
//! Reads go cache first and fall back to storage; a storage hit refreshes the
//! cache from a detached task so the caller never waits on the cache write.
//! Writes go straight to storage and leave the cache alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orders_core::{CacheError, Order, OrdersError, StorageError};
use orders_storage::{OrderCache, OrderStorage};
use tokio::task::JoinHandle;

use crate::ingest::MessageHandler;

/// Default bound on a detached cache write.
pub const DEFAULT_POPULATE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tuning for [`OrderService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upper bound for a background cache populate.
    pub populate_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            populate_timeout: DEFAULT_POPULATE_TIMEOUT,
        }
    }
}

impl ServiceConfig {
    /// # Environment Variables
    /// - `CACHE_POPULATE_TIMEOUT_MS`: bound on a background cache write (default: 5000)
    pub fn from_env() -> Self {
        Self {
            populate_timeout: std::env::var("CACHE_POPULATE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POPULATE_TIMEOUT),
        }
    }
}

/// Coordinates the cache and the durable store.
#[derive(Clone)]
pub struct OrderService {
    storage: Arc<dyn OrderStorage>,
    cache: Arc<dyn OrderCache>,
    config: ServiceConfig,
}

impl OrderService {
    pub fn new(storage: Arc<dyn OrderStorage>, cache: Arc<dyn OrderCache>) -> Self {
        Self {
            storage,
            cache,
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist a new order. The cache is not touched.
    pub async fn save_order(&self, order: &Order) -> Result<(), StorageError> {
        self.storage.save_order(order).await
    }

    /// Look up an order, preferring the cache.
    ///
    /// Cache failures are logged and treated as a miss. Storage errors,
    /// [`StorageError::NotFound`] included, are returned unchanged.
    pub async fn get_order(&self, order_uid: &str) -> Result<Order, StorageError> {
        match self.cache.get(order_uid).await {
            Ok(Some(order)) => {
                tracing::debug!(order_uid, "Cache hit");
                return Ok(order);
            }
            Ok(None) => tracing::debug!(order_uid, "Cache miss"),
            Err(e) => tracing::warn!(order_uid, error = %e, "Cache read failed, using storage"),
        }

        let order = self.storage.get_order_by_id(order_uid).await?;
        self.spawn_populate(order.clone());
        Ok(order)
    }

    /// Write `order` to the cache from a task that outlives the request.
    fn spawn_populate(&self, order: Order) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let timeout = self.config.populate_timeout;

        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, cache.set(&order.order_uid, &order))
                .await
                .unwrap_or_else(|_| {
                    Err(CacheError::Timeout {
                        millis: timeout.as_millis() as u64,
                    })
                });

            match result {
                Ok(()) => tracing::debug!(order_uid = %order.order_uid, "Cache populated"),
                Err(e) => tracing::warn!(
                    order_uid = %order.order_uid,
                    error = %e,
                    "Cache populate failed"
                ),
            }
        })
    }
}

#[async_trait]
impl MessageHandler<Order> for OrderService {
    async fn handle(&self, order: Order) -> Result<(), OrdersError> {
        self.save_order(&order).await.map_err(OrdersError::from)
    }
}
