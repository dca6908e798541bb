//! Service layer.

pub mod order_service;

pub use order_service::{OrderService, ServiceConfig, DEFAULT_POPULATE_TIMEOUT};
