//! Shared application state for Axum routers.

use crate::services::OrderService;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
}

impl AppState {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }
}
