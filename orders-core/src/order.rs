//! The order aggregate.
//!
//! An [`Order`] owns exactly one [`Delivery`], exactly one [`Payment`] and an
//! ordered list of [`Item`]s. Field names match the JSON documents produced
//! upstream, so the same types serve the message feed, the HTTP API and the
//! cache snapshot.

use chrono::SubsecRound;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::DecodeError;
use crate::Timestamp;

/// Fractional-second digits a stored timestamp keeps (microseconds).
pub const TIMESTAMP_DIGITS: u16 = 6;

/// Cut `ts` down to the resolution of a `TIMESTAMPTZ` column.
pub fn truncate_timestamp(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(TIMESTAMP_DIGITS)
}

/// Root aggregate, keyed by `order_uid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    /// Entry channel the order came through.
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub date_created: Timestamp,
    pub oof_shard: String,
}

/// Recipient details. 1:1 with the order, no identity of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details. 1:1 with the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i32,
    /// Unix seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i32,
    pub goods_total: i32,
    pub custom_fee: i32,
}

/// A single order line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i32,
    pub rid: String,
    pub name: String,
    /// Discount, in percent.
    pub sale: i32,
    pub size: String,
    pub total_price: i32,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

impl Order {
    /// Decode an order from a JSON document and validate it.
    ///
    /// `date_created` is truncated to microseconds, so a decoded order
    /// reads back from storage unchanged.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut order: Order = serde_json::from_slice(bytes)?;
        order.date_created = truncate_timestamp(order.date_created);
        order.validate()?;
        Ok(order)
    }

    /// Check the invariants serde cannot express.
    ///
    /// Rejects an empty identifier and repeated lines (same `chrt_id` and
    /// `rid`), which would otherwise make reconstruction ambiguous.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.order_uid.trim().is_empty() {
            return Err(DecodeError::Invalid {
                field: "order_uid".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert((item.chrt_id, item.rid.as_str())) {
                return Err(DecodeError::Invalid {
                    field: "items".to_string(),
                    reason: format!(
                        "duplicate line chrt_id={} rid={}",
                        item.chrt_id, item.rid
                    ),
                });
            }
        }

        Ok(())
    }

    /// Sort items the way storage returns them: ascending `chrt_id`,
    /// insertion order kept for ties.
    pub fn sort_items(&mut self) {
        self.items.sort_by_key(|item| item.chrt_id);
    }

    /// A copy of this order as storage returns it: items in storage order
    /// and `date_created` at microsecond resolution.
    pub fn normalized(&self) -> Self {
        let mut order = self.clone();
        order.sort_items();
        order.date_created = truncate_timestamp(order.date_created);
        order
    }
}
