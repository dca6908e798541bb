//! Liveness endpoint. No dependencies are checked.

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};

use crate::state::AppState;

/// GET /health - Process liveness check
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = String),
    ),
)]
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "working")
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
