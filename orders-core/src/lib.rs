//! Orders Core - Entity Types
//!
//! The order aggregate and the error taxonomy shared by every other crate.
//! This crate has no I/O: storage, caching and transport live elsewhere.

pub mod error;
pub mod order;

pub use error::{
    CacheError, ConfigError, DecodeError, IngestError, OrdersError, OrdersResult, StorageError,
};
pub use order::{truncate_timestamp, Delivery, Item, Order, Payment, TIMESTAMP_DIGITS};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
