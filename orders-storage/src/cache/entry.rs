//! Encoding of cache entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use orders_core::{CacheError, Order};

const EXPIRY_LEN: usize = 8;

/// A decoded cache entry.
#[derive(Debug)]
pub enum CachedEntry {
    Live(Order),
    Expired,
}

/// Serialize `order` with an expiry of `now + ttl`.
pub fn encode(order: &Order, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<u8>, CacheError> {
    let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at = now.timestamp_millis().saturating_add(ttl_millis);

    let value_bytes =
        serde_json::to_vec(order).map_err(|e| CacheError::Serialization(e.to_string()))?;

    let mut full_bytes = Vec::with_capacity(EXPIRY_LEN + value_bytes.len());
    full_bytes.extend_from_slice(&expires_at.to_le_bytes());
    full_bytes.extend_from_slice(&value_bytes);
    Ok(full_bytes)
}

/// Decode an entry read at `now`.
///
/// Expiry is checked before the payload is parsed, so an expired entry is a
/// clean miss even if its body would not deserialize.
pub fn decode(bytes: &[u8], now: DateTime<Utc>) -> Result<CachedEntry, CacheError> {
    if bytes.len() < EXPIRY_LEN {
        return Err(CacheError::Deserialization(format!(
            "entry is {} bytes, shorter than its header",
            bytes.len()
        )));
    }

    let expires_at = expires_at(bytes)
        .ok_or_else(|| CacheError::Deserialization("Invalid expiry".into()))?;

    if now.timestamp_millis() >= expires_at {
        return Ok(CachedEntry::Expired);
    }

    let order: Order = serde_json::from_slice(&bytes[EXPIRY_LEN..])
        .map_err(|e| CacheError::Deserialization(e.to_string()))?;
    Ok(CachedEntry::Live(order))
}

/// Whether the entry in `bytes` should be evicted at `now`.
///
/// Only the header is read. Entries too short to carry one are stale too.
pub fn is_stale(bytes: &[u8], now: DateTime<Utc>) -> bool {
    match expires_at(bytes) {
        Some(expires_at) => now.timestamp_millis() >= expires_at,
        None => true,
    }
}

fn expires_at(bytes: &[u8]) -> Option<i64> {
    let header: [u8; EXPIRY_LEN] = bytes.get(..EXPIRY_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}
