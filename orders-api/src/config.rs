//! Process configuration.
//!
//! Every section reads its own environment variables; [`OrdersConfig`]
//! gathers them and checks cross-field constraints once at startup.

use std::net::SocketAddr;
use std::time::Duration;

use orders_core::ConfigError;
use orders_storage::CacheConfig;

use crate::db::DbConfig;
use crate::ingest::{KafkaConfig, PipelineConfig};
use crate::services::ServiceConfig;
use crate::telemetry::TelemetryConfig;

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Deadline applied to every request.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8081,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// # Environment Variables
    /// - `ORDERS_HTTP_BIND`: listen address (default: 0.0.0.0)
    /// - `ORDERS_HTTP_PORT`: listen port (default: 8081)
    /// - `ORDERS_REQUEST_TIMEOUT_SECS`: per-request deadline (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: std::env::var("ORDERS_HTTP_BIND").unwrap_or(defaults.bind),
            port: std::env::var("ORDERS_HTTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            request_timeout: std::env::var("ORDERS_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    /// Resolve the socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "bind".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }
}

/// Complete configuration of the service.
#[derive(Debug, Clone, Default)]
pub struct OrdersConfig {
    pub db: DbConfig,
    pub cache: CacheConfig,
    pub kafka: KafkaConfig,
    pub pipeline: PipelineConfig,
    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl OrdersConfig {
    pub fn from_env() -> Self {
        Self {
            db: DbConfig::from_env(),
            cache: CacheConfig::from_env(),
            kafka: KafkaConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            service: ServiceConfig::from_env(),
            server: ServerConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    /// Check the constraints that single sections cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.db.validate()?;
        self.kafka.validate()?;

        if self.cache.entry_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache_ttl".to_string(),
                value: "0".to_string(),
                reason: "entries would expire immediately".to_string(),
            });
        }
        if self.cache.max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "cache map must be non-empty".to_string(),
            });
        }

        self.server.socket_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OrdersConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let config = OrdersConfig {
            cache: CacheConfig::default().with_ttl(Duration::ZERO),
            ..OrdersConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "cache_ttl"
        ));
    }

    #[test]
    fn test_rejects_min_conns_above_max() {
        let mut config = OrdersConfig::default();
        config.db.min_conns = 20;
        config.db.max_conns = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompatibleOptions { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_start_offset() {
        let mut config = OrdersConfig::default();
        config.kafka.start_offset = "sometime".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let server = ServerConfig::default();
        assert_eq!(server.socket_addr().unwrap().port(), 8081);

        let bad = ServerConfig {
            bind: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(bad.socket_addr().is_err());
    }
}
