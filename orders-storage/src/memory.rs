//! In-memory order storage.
//!
//! Mirrors the relational layout used by the Postgres adapter: one map per
//! table, with items keyed by a monotonically increasing row id. A save holds
//! the write lock for its whole duration and records every row it adds, so a
//! failure part way through removes exactly those rows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use orders_core::{truncate_timestamp, Delivery, Item, Order, Payment, StorageError, Timestamp};

use crate::traits::OrderStorage;

/// Header columns of an order, without its child rows.
#[derive(Debug, Clone)]
struct OrderRow {
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: Timestamp,
    oof_shard: String,
}

impl OrderRow {
    fn from_order(order: &Order) -> Self {
        Self {
            track_number: order.track_number.clone(),
            entry: order.entry.clone(),
            locale: order.locale.clone(),
            internal_signature: order.internal_signature.clone(),
            customer_id: order.customer_id.clone(),
            delivery_service: order.delivery_service.clone(),
            shardkey: order.shardkey.clone(),
            sm_id: order.sm_id,
            // TIMESTAMPTZ keeps microseconds
            date_created: truncate_timestamp(order.date_created),
            oof_shard: order.oof_shard.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct ItemRow {
    id: u64,
    order_uid: String,
    item: Item,
}

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<String, OrderRow>,
    deliveries: HashMap<String, Delivery>,
    payments: HashMap<String, Payment>,
    items: Vec<ItemRow>,
    next_item_id: u64,
}

/// Row counts per table for one order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub orders: usize,
    pub deliveries: usize,
    pub payments: usize,
    pub items: usize,
}

impl RowCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

enum Undo {
    Order(String),
    Delivery(String),
    Payment(String),
    Item(u64),
}

/// Writes applied under the table lock. Dropped without `commit`, every row
/// it added is removed again.
struct StagedWrite<'a> {
    tables: RwLockWriteGuard<'a, Tables>,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'a> StagedWrite<'a> {
    fn begin(tables: RwLockWriteGuard<'a, Tables>) -> Self {
        Self {
            tables,
            undo: Vec::new(),
            committed: false,
        }
    }

    fn insert_order(&mut self, order_uid: &str, row: OrderRow) {
        self.tables.orders.insert(order_uid.to_string(), row);
        self.undo.push(Undo::Order(order_uid.to_string()));
    }

    fn insert_delivery(&mut self, order_uid: &str, delivery: Delivery) {
        self.tables.deliveries.insert(order_uid.to_string(), delivery);
        self.undo.push(Undo::Delivery(order_uid.to_string()));
    }

    fn insert_payment(&mut self, order_uid: &str, payment: Payment) {
        self.tables.payments.insert(order_uid.to_string(), payment);
        self.undo.push(Undo::Payment(order_uid.to_string()));
    }

    fn insert_item(&mut self, order_uid: &str, item: Item) {
        self.tables.next_item_id += 1;
        let id = self.tables.next_item_id;
        self.tables.items.push(ItemRow {
            id,
            order_uid: order_uid.to_string(),
            item,
        });
        self.undo.push(Undo::Item(id));
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedWrite<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Order(uid) => {
                    self.tables.orders.remove(&uid);
                }
                Undo::Delivery(uid) => {
                    self.tables.deliveries.remove(&uid);
                }
                Undo::Payment(uid) => {
                    self.tables.payments.remove(&uid);
                }
                Undo::Item(id) => self.tables.items.retain(|row| row.id != id),
            }
        }
    }
}

/// Order storage held entirely in memory.
///
/// Besides implementing [`OrderStorage`], it exposes call counters and
/// failure injection for exercising the service and pipeline.
#[derive(Debug, Default)]
pub struct InMemoryOrderStorage {
    tables: RwLock<Tables>,
    fail_on_item: RwLock<Option<usize>>,
    unavailable: AtomicBool,
    save_calls: AtomicU64,
    get_calls: AtomicU64,
}

impl InMemoryOrderStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next saves when inserting the item at `index` (zero based).
    pub fn fail_on_item(&self, index: Option<usize>) {
        if let Ok(mut slot) = self.fail_on_item.write() {
            *slot = index;
        }
    }

    /// Make every call fail as if the pool could not hand out a connection.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn save_calls(&self) -> u64 {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of rows each table holds for `order_uid`.
    pub fn row_counts(&self, order_uid: &str) -> Result<RowCounts, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(RowCounts {
            orders: usize::from(tables.orders.contains_key(order_uid)),
            deliveries: usize::from(tables.deliveries.contains_key(order_uid)),
            payments: usize::from(tables.payments.contains_key(order_uid)),
            items: tables
                .items
                .iter()
                .filter(|row| row.order_uid == order_uid)
                .count(),
        })
    }

    /// Number of stored orders.
    pub fn order_count(&self) -> usize {
        self.tables.read().map(|t| t.orders.len()).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::PoolUnavailable {
                reason: "storage marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStorage for InMemoryOrderStorage {
    async fn save_order(&self, order: &Order) -> Result<(), StorageError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let fail_on_item = *self
            .fail_on_item
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;

        if tables.orders.contains_key(&order.order_uid) {
            return Err(StorageError::Duplicate {
                order_uid: order.order_uid.clone(),
            });
        }

        let uid = order.order_uid.as_str();
        let mut tx = StagedWrite::begin(tables);
        tx.insert_order(uid, OrderRow::from_order(order));
        tx.insert_delivery(uid, order.delivery.clone());
        tx.insert_payment(uid, order.payment.clone());

        for (index, item) in order.items.iter().enumerate() {
            if fail_on_item == Some(index) {
                return Err(StorageError::InjectedFailure {
                    reason: format!("item {} of order {}", index, uid),
                });
            }
            tx.insert_item(uid, item.clone());
        }

        tx.commit();
        Ok(())
    }

    async fn get_order_by_id(&self, order_uid: &str) -> Result<Order, StorageError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        let not_found = || StorageError::NotFound {
            order_uid: order_uid.to_string(),
        };

        let header = tables.orders.get(order_uid).ok_or_else(not_found)?;
        let delivery = tables.deliveries.get(order_uid).ok_or_else(not_found)?;
        let payment = tables.payments.get(order_uid).ok_or_else(not_found)?;

        let mut rows: Vec<&ItemRow> = tables
            .items
            .iter()
            .filter(|row| row.order_uid == order_uid)
            .collect();
        rows.sort_by_key(|row| (row.item.chrt_id, row.id));

        Ok(Order {
            order_uid: order_uid.to_string(),
            track_number: header.track_number.clone(),
            entry: header.entry.clone(),
            delivery: delivery.clone(),
            payment: payment.clone(),
            items: rows.into_iter().map(|row| row.item.clone()).collect(),
            locale: header.locale.clone(),
            internal_signature: header.internal_signature.clone(),
            customer_id: header.customer_id.clone(),
            delivery_service: header.delivery_service.clone(),
            shardkey: header.shardkey.clone(),
            sm_id: header.sm_id,
            date_created: header.date_created,
            oof_shard: header.oof_shard.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn order(uid: &str, chrt_ids: &[i64]) -> Order {
        Order {
            order_uid: uid.to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                ..Delivery::default()
            },
            payment: Payment {
                transaction: uid.to_string(),
                amount: 1817,
                ..Payment::default()
            },
            items: chrt_ids
                .iter()
                .enumerate()
                .map(|(i, chrt_id)| Item {
                    chrt_id: *chrt_id,
                    rid: format!("rid-{}", i),
                    ..Item::default()
                })
                .collect(),
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
            oof_shard: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_then_get_round_trip() {
        let storage = InMemoryOrderStorage::new();
        let saved = order("mem-1", &[7]);

        storage.save_order(&saved).await.unwrap();
        let loaded = storage.get_order_by_id("mem-1").await.unwrap();

        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn test_items_come_back_sorted_by_chrt_id() {
        let storage = InMemoryOrderStorage::new();
        storage.save_order(&order("mem-2", &[30, 10, 20])).await.unwrap();

        let loaded = storage.get_order_by_id("mem-2").await.unwrap();
        let ids: Vec<i64> = loaded.items.iter().map(|i| i.chrt_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let storage = InMemoryOrderStorage::new();
        let err = storage.get_order_by_id("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected_and_original_kept() {
        let storage = InMemoryOrderStorage::new();
        storage.save_order(&order("dup", &[1])).await.unwrap();

        let mut second = order("dup", &[1, 2]);
        second.track_number = "OTHER".to_string();
        let err = storage.save_order(&second).await.unwrap_err();

        assert!(matches!(err, StorageError::Duplicate { .. }));
        let loaded = storage.get_order_by_id("dup").await.unwrap();
        assert_eq!(loaded.track_number, "WBILMTESTTRACK");
        assert_eq!(storage.row_counts("dup").unwrap().items, 1);
    }

    #[tokio::test]
    async fn test_failure_on_item_leaves_no_rows() {
        let storage = InMemoryOrderStorage::new();
        storage.fail_on_item(Some(1));

        let err = storage
            .save_order(&order("atomic", &[1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InjectedFailure { .. }));
        assert!(storage.row_counts("atomic").unwrap().is_empty());
        assert!(storage
            .get_order_by_id("atomic")
            .await
            .unwrap_err()
            .is_not_found());

        storage.fail_on_item(None);
        storage.save_order(&order("atomic", &[1, 2, 3])).await.unwrap();
        assert_eq!(
            storage.row_counts("atomic").unwrap(),
            RowCounts {
                orders: 1,
                deliveries: 1,
                payments: 1,
                items: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_rollback_keeps_other_orders() {
        let storage = InMemoryOrderStorage::new();
        storage.save_order(&order("keep", &[5])).await.unwrap();

        storage.fail_on_item(Some(0));
        assert!(storage.save_order(&order("drop", &[6])).await.is_err());

        assert_eq!(storage.order_count(), 1);
        assert_eq!(storage.row_counts("keep").unwrap().items, 1);
    }

    #[tokio::test]
    async fn test_unavailable_storage() {
        let storage = InMemoryOrderStorage::new();
        storage.set_unavailable(true);

        let err = storage.save_order(&order("x", &[])).await.unwrap_err();
        assert!(matches!(err, StorageError::PoolUnavailable { .. }));
        assert_eq!(storage.save_calls(), 1);
    }

    #[tokio::test]
    async fn test_order_without_items() {
        let storage = InMemoryOrderStorage::new();
        storage.save_order(&order("empty", &[])).await.unwrap();

        let loaded = storage.get_order_by_id("empty").await.unwrap();
        assert!(loaded.items.is_empty());
        assert_eq!(storage.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_timestamp_kept_at_microsecond_resolution() {
        let storage = InMemoryOrderStorage::new();
        let mut saved = order("nanos", &[1]);
        saved.date_created = saved.date_created + chrono::Duration::nanoseconds(123_456_789);

        storage.save_order(&saved).await.unwrap();
        let loaded = storage.get_order_by_id("nanos").await.unwrap();

        assert_eq!(loaded.date_created.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(loaded, saved.normalized());
    }
}
