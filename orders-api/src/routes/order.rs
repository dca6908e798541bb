//! Order REST API Routes

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use orders_core::Order;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /order/{id} - Get order by ID
#[utoipa::path(
    get,
    path = "/order/{id}",
    tag = "Orders",
    params(
        ("id" = String, Path, description = "Order UID")
    ),
    responses(
        (status = 200, description = "Order details", body = Order),
        (status = 404, description = "Order not found", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError),
    ),
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> ApiResult<Json<Order>> {
    let order = state.orders.get_order(&order_uid).await?;
    Ok(Json(order))
}

/// POST /order/ - Store a new order
///
/// The body is decoded by hand so every malformed payload, including a
/// missing or wrong content type, is reported as a 400 with the same shape.
#[utoipa::path(
    post,
    path = "/order/",
    tag = "Orders",
    request_body = Order,
    responses(
        (status = 200, description = "Order stored"),
        (status = 400, description = "Malformed or invalid order", body = ApiError),
        (status = 409, description = "Order already exists", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError),
    ),
)]
pub async fn create_order(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let order = Order::from_json(&body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected order body");
        ApiError::from(e)
    })?;

    state.orders.save_order(&order).await?;
    tracing::info!(order_uid = %order.order_uid, items = order.items.len(), "Order stored");

    Ok(StatusCode::OK)
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/order/:id", get(get_order))
        .route("/order/", post(create_order))
        .route("/order", post(create_order))
}
