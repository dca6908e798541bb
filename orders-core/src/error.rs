//! Error types for order operations

use thiserror::Error;

/// Persistence layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Order not found: {order_uid}")]
    NotFound { order_uid: String },

    #[error("Order already exists: {order_uid}")]
    Duplicate { order_uid: String },

    #[error("Insert into {table} failed: {reason}")]
    InsertFailed { table: String, reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Connection pool unavailable: {reason}")]
    PoolUnavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Injected failure: {reason}")]
    InjectedFailure { reason: String },
}

impl StorageError {
    /// True when the record simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Cache layer errors. Never fatal to a caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache serialization failed: {0}")]
    Serialization(String),

    #[error("Cache deserialization failed: {0}")]
    Deserialization(String),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache operation timed out after {millis}ms")]
    Timeout { millis: u64 },
}

/// Payload decoding errors, shared by the message feed and the HTTP body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed payload: {reason}")]
    Malformed { reason: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed {
            reason: err.to_string(),
        }
    }
}

/// Message log errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Message transport error: {reason}")]
    Transport { reason: String },

    #[error("Topic setup failed for {topic}: {reason}")]
    TopicSetup { topic: String, reason: String },

    #[error("Offset store error: {reason}")]
    OffsetStore { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for the order service.
#[derive(Debug, Clone, Error)]
pub enum OrdersError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Startup error: {0}")]
    Startup(String),
}

/// Result type alias for order operations.
pub type OrdersResult<T> = Result<T, OrdersError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            order_uid: "test123".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not found"));
        assert!(msg.contains("test123"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_storage_error_duplicate_is_not_not_found() {
        let err = StorageError::Duplicate {
            order_uid: "test123".to_string(),
        };
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_decode_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = DecodeError::from(serde_err);
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn test_cache_error_display_timeout() {
        let err = CacheError::Timeout { millis: 5000 };
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn test_orders_error_from_variants() {
        let storage = OrdersError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, OrdersError::Storage(_)));

        let cache = OrdersError::from(CacheError::Backend("down".to_string()));
        assert!(matches!(cache, OrdersError::Cache(_)));

        let decode = OrdersError::from(DecodeError::Invalid {
            field: "order_uid".to_string(),
            reason: "empty".to_string(),
        });
        assert!(matches!(decode, OrdersError::Decode(_)));

        let ingest = OrdersError::from(IngestError::Transport {
            reason: "broker gone".to_string(),
        });
        assert!(matches!(ingest, OrdersError::Ingest(_)));

        let config = OrdersError::from(ConfigError::IncompatibleOptions {
            option_a: "min_conns".to_string(),
            option_b: "max_conns".to_string(),
        });
        assert!(matches!(config, OrdersError::Config(_)));
    }
}
