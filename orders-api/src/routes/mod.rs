//! REST API Routes Module
//!
//! Assembles the order and health routes, the OpenAPI document and the
//! tower layers applied to every request.

use std::time::Duration;

use axum::{response::IntoResponse, routing::get, Json, Router};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::openapi::ApiDoc;
use crate::state::AppState;

pub mod health;
pub mod order;

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Build the complete router.
///
/// Every request is traced and bounded by `request_timeout`; a request that
/// runs past it is dropped, which releases any pooled connection it held.
pub fn create_api_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .merge(order::create_router())
        .merge(health::create_router())
        .route("/openapi.json", get(openapi_json))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
