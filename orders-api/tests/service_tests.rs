//! Order Service Read/Write Path Tests
//!
//! Exercises the cache-aside read against the in-memory adapters:
//! - a cached order is served without touching storage
//! - a storage hit populates the cache in the background
//! - cache malfunctions degrade to a storage read
//! - writes never touch the cache

use std::sync::Arc;
use std::time::Duration;

use orders_api::OrderService;
use orders_core::StorageError;
use orders_test_utils::fixtures::{order_with_items, sample_order};
use orders_test_utils::{wait_for_cache, InMemoryOrderCache, InMemoryOrderStorage, OrderCache, OrderStorage};

const CACHE_WAIT: Duration = Duration::from_secs(2);

fn service() -> (OrderService, Arc<InMemoryOrderStorage>, Arc<InMemoryOrderCache>) {
    let storage = Arc::new(InMemoryOrderStorage::new());
    let cache = Arc::new(InMemoryOrderCache::default());
    let service = OrderService::new(storage.clone(), cache.clone());
    (service, storage, cache)
}

#[tokio::test]
async fn test_repeated_reads_hit_storage_once() {
    let (service, storage, cache) = service();
    storage.save_order(&sample_order("test123")).await.unwrap();

    let first = service.get_order("test123").await.unwrap();
    assert_eq!(first, sample_order("test123"));
    assert!(wait_for_cache(cache.as_ref(), "test123", CACHE_WAIT).await.is_some());

    for _ in 0..5 {
        let again = service.get_order("test123").await.unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(storage.get_calls(), 1);
}

#[tokio::test]
async fn test_cached_entry_wins_over_storage() {
    let (service, storage, cache) = service();
    storage.save_order(&sample_order("stale")).await.unwrap();

    let mut cached = sample_order("stale");
    cached.customer_id = "from-cache".to_string();
    cache.set("stale", &cached).await.unwrap();

    let loaded = service.get_order("stale").await.unwrap();
    assert_eq!(loaded.customer_id, "from-cache");
    assert_eq!(storage.get_calls(), 0);
}

#[tokio::test]
async fn test_corrupt_cache_entry_falls_back_to_storage() {
    let (service, storage, cache) = service();
    storage.save_order(&sample_order("corrupt")).await.unwrap();
    cache.insert_raw("corrupt", b"not an entry".to_vec()).unwrap();

    let loaded = service.get_order("corrupt").await.unwrap();
    assert_eq!(loaded, sample_order("corrupt"));
    assert_eq!(storage.get_calls(), 1);

    // The background populate replaces the bad entry
    let repaired = wait_for_cache(cache.as_ref(), "corrupt", CACHE_WAIT).await;
    assert_eq!(repaired, Some(sample_order("corrupt")));
}

#[tokio::test]
async fn test_cache_read_failure_falls_back_to_storage() {
    let (service, storage, cache) = service();
    storage.save_order(&sample_order("down")).await.unwrap();
    cache.fail_gets(true);

    let loaded = service.get_order("down").await.unwrap();
    assert_eq!(loaded.order_uid, "down");
}

#[tokio::test]
async fn test_missing_order_is_not_found_and_not_cached() {
    let (service, _storage, cache) = service();

    let err = service.get_order("missing").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.set_calls(), 0);
    assert!(!cache.contains("missing"));
}

#[tokio::test]
async fn test_storage_failure_is_returned() {
    let (service, storage, _cache) = service();
    storage.set_unavailable(true);

    let err = service.get_order("any").await.unwrap_err();
    assert!(matches!(err, StorageError::PoolUnavailable { .. }));
}

#[tokio::test]
async fn test_save_leaves_cache_untouched() {
    let (service, storage, cache) = service();

    service.save_order(&order_with_items("fresh", &[3, 1, 2])).await.unwrap();

    assert_eq!(storage.order_count(), 1);
    assert_eq!(cache.set_calls(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_duplicate_save_is_rejected() {
    let (service, _storage, _cache) = service();
    service.save_order(&sample_order("dup")).await.unwrap();

    let err = service.save_order(&sample_order("dup")).await.unwrap_err();
    assert!(matches!(err, StorageError::Duplicate { .. }));
}

#[tokio::test]
async fn test_read_returns_items_sorted() {
    let (service, _storage, _cache) = service();
    service.save_order(&order_with_items("sorted", &[30, 10, 20])).await.unwrap();

    let loaded = service.get_order("sorted").await.unwrap();
    let ids: Vec<i64> = loaded.items.iter().map(|i| i.chrt_id).collect();
    assert_eq!(ids, vec![10, 20, 30]);
}
