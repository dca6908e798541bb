//! Orders Test Utilities
//!
//! Shared test infrastructure for the order service crates:
//! - Proptest generators for orders and their parts
//! - Fixtures built around the reference sample document
//! - In-memory storage and cache adapters
//! - Polling helpers for the background cache write

use std::time::Duration;

// Re-export the in-memory adapters so tests only need this crate
pub use orders_storage::{InMemoryOrderCache, InMemoryOrderStorage, OrderCache, OrderStorage, RowCounts};

// Re-export core types for convenience
pub use orders_core::{Delivery, Item, Order, OrdersError, Payment, StorageError, Timestamp};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating order types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a non-empty order identifier.
    pub fn arb_order_uid() -> impl Strategy<Value = String> {
        "[a-z0-9]{8,24}"
    }

    /// Generate a Timestamp (2020-2030) with nanosecond precision, finer
    /// than storage keeps.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_default()
        })
    }

    /// Generate a Delivery.
    pub fn arb_delivery() -> impl Strategy<Value = Delivery> {
        (
            "[A-Za-z ]{1,30}",
            "\\+[0-9]{7,12}",
            "[0-9]{5,7}",
            "[A-Za-z ]{1,20}",
            "[A-Za-z0-9 ]{1,40}",
            "[A-Za-z]{1,20}",
            "[a-z]{1,10}@[a-z]{1,8}\\.com",
        )
            .prop_map(|(name, phone, zip, city, address, region, email)| Delivery {
                name,
                phone,
                zip,
                city,
                address,
                region,
                email,
            })
    }

    /// Generate a Payment.
    pub fn arb_payment() -> impl Strategy<Value = Payment> {
        (
            "[a-z0-9]{8,24}",
            "[a-z0-9]{0,12}",
            prop_oneof![Just("USD"), Just("EUR"), Just("RUB")],
            "[a-z]{3,10}",
            0i32..1_000_000,
            1577836800i64..1893456000i64,
            "[a-z]{3,10}",
            0i32..10_000,
            0i32..1_000_000,
            0i32..1_000,
        )
            .prop_map(
                |(
                    transaction,
                    request_id,
                    currency,
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    delivery_cost,
                    goods_total,
                    custom_fee,
                )| Payment {
                    transaction,
                    request_id,
                    currency: currency.to_string(),
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    delivery_cost,
                    goods_total,
                    custom_fee,
                },
            )
    }

    /// Generate an Item. `rid` is random, so callers that need unique lines
    /// should use [`arb_items`].
    pub fn arb_item() -> impl Strategy<Value = Item> {
        (
            1i64..100_000_000,
            "[A-Z]{4,16}",
            0i32..100_000,
            "[a-z0-9]{8,21}",
            "[A-Za-z ]{1,30}",
            0i32..100,
            "[0-9A-Z]{1,3}",
            0i32..100_000,
            1i64..10_000_000,
            "[A-Za-z ]{1,20}",
            100i32..400,
        )
            .prop_map(
                |(
                    chrt_id,
                    track_number,
                    price,
                    rid,
                    name,
                    sale,
                    size,
                    total_price,
                    nm_id,
                    brand,
                    status,
                )| Item {
                    chrt_id,
                    track_number,
                    price,
                    rid,
                    name,
                    sale,
                    size,
                    total_price,
                    nm_id,
                    brand,
                    status,
                },
            )
    }

    /// Generate up to `max` items with pairwise distinct `rid`s. `chrt_id`
    /// is drawn from a small range so ties are common.
    pub fn arb_items(max: usize) -> impl Strategy<Value = Vec<Item>> {
        prop::collection::vec((arb_item(), 1i64..6), 0..=max).prop_map(|lines| {
            lines
                .into_iter()
                .enumerate()
                .map(|(index, (mut item, chrt_id))| {
                    item.chrt_id = chrt_id;
                    item.rid = format!("{}-{}", item.rid, index);
                    item
                })
                .collect()
        })
    }

    /// Generate a valid Order.
    pub fn arb_order() -> impl Strategy<Value = Order> {
        (
            arb_order_uid(),
            "[A-Z]{4,16}",
            "[A-Z]{2,6}",
            arb_delivery(),
            arb_payment(),
            arb_items(8),
            prop_oneof![Just("en"), Just("ru")],
            "[a-z]{0,8}",
            "[a-z0-9]{1,12}",
            "[a-z]{3,10}",
            (0i32..1_000, arb_timestamp(), "[0-9]{1,2}", "[0-9]{1,2}"),
        )
            .prop_map(
                |(
                    order_uid,
                    track_number,
                    entry,
                    delivery,
                    payment,
                    items,
                    locale,
                    internal_signature,
                    customer_id,
                    delivery_service,
                    (sm_id, date_created, shardkey, oof_shard),
                )| Order {
                    order_uid,
                    track_number,
                    entry,
                    delivery,
                    payment,
                    items,
                    locale: locale.to_string(),
                    internal_signature,
                    customer_id,
                    delivery_service,
                    shardkey,
                    sm_id,
                    date_created,
                    oof_shard,
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built orders for common test scenarios.

    use super::*;
    use chrono::TimeZone;

    /// `date_created` of the sample document.
    pub fn sample_timestamp() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2021, 11, 26, 6, 22, 19)
            .single()
            .unwrap_or_default()
    }

    /// The single line of the sample document.
    pub fn sample_item() -> Item {
        Item {
            chrt_id: 9934930,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317,
            nm_id: 2389212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }
    }

    /// The sample document under a caller-chosen identifier.
    pub fn sample_order(order_uid: &str) -> Order {
        Order {
            order_uid: order_uid.to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                phone: "+9720000000".to_string(),
                zip: "2639809".to_string(),
                city: "Kiryat Mozkin".to_string(),
                address: "Ploshad Mira 15".to_string(),
                region: "Kraiot".to_string(),
                email: "test@gmail.com".to_string(),
            },
            payment: Payment {
                transaction: order_uid.to_string(),
                request_id: String::new(),
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 1817,
                payment_dt: 1637907727,
                bank: "alpha".to_string(),
                delivery_cost: 1500,
                goods_total: 317,
                custom_fee: 0,
            },
            items: vec![sample_item()],
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: sample_timestamp(),
            oof_shard: "1".to_string(),
        }
    }

    /// The sample order serialized as a message payload or request body.
    pub fn sample_order_json(order_uid: &str) -> Vec<u8> {
        serde_json::to_vec(&sample_order(order_uid)).unwrap_or_default()
    }

    /// The sample order with one line per `chrt_id`, in the given order.
    pub fn order_with_items(order_uid: &str, chrt_ids: &[i64]) -> Order {
        let mut order = sample_order(order_uid);
        order.items = chrt_ids
            .iter()
            .enumerate()
            .map(|(index, chrt_id)| Item {
                chrt_id: *chrt_id,
                rid: format!("rid-{}", index),
                ..sample_item()
            })
            .collect();
        order
    }
}

// ============================================================================
// ASYNC HELPERS
// ============================================================================

/// Poll `cache` until it holds `order_uid` or `timeout` elapses.
///
/// Cache population after a read runs in the background, so tests observe
/// it through this instead of a fixed sleep.
pub async fn wait_for_cache<C>(cache: &C, order_uid: &str, timeout: Duration) -> Option<Order>
where
    C: OrderCache + ?Sized,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(order)) = cache.get(order_uid).await {
            return Some(order);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
