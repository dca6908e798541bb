//! HTTP Endpoint Tests
//!
//! Drives the full router (layers included) with `tower::ServiceExt::oneshot`
//! against in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use orders_api::{create_api_router, ApiError, AppState, ErrorCode, OrderService};
use orders_core::Order;
use orders_test_utils::fixtures::{order_with_items, sample_order, sample_order_json};
use orders_test_utils::{InMemoryOrderCache, InMemoryOrderStorage, OrderStorage};
use tower::ServiceExt;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn app(storage: Arc<InMemoryOrderStorage>) -> Router {
    let service = OrderService::new(storage, Arc::new(InMemoryOrderCache::default()));
    create_api_router(AppState::new(service), REQUEST_TIMEOUT)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .expect("request should build")
}

fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request should build")
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable")
        .to_vec()
}

async fn error_body(response: axum::response::Response) -> ApiError {
    serde_json::from_slice(&body_bytes(response).await).expect("error body should be JSON")
}

// ============================================================================
// GET /order/{id}
// ============================================================================

#[tokio::test]
async fn test_get_existing_order() {
    let storage = Arc::new(InMemoryOrderStorage::new());
    storage.save_order(&sample_order("test123")).await.unwrap();

    let response = app(storage).oneshot(get("/order/test123")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let order: Order = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(order, sample_order("test123"));
}

#[tokio::test]
async fn test_get_returns_items_sorted() {
    let storage = Arc::new(InMemoryOrderStorage::new());
    storage
        .save_order(&order_with_items("multi", &[9934930, 1, 500]))
        .await
        .unwrap();

    let response = app(storage).oneshot(get("/order/multi")).await.unwrap();
    let order: Order = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let ids: Vec<i64> = order.items.iter().map(|i| i.chrt_id).collect();
    assert_eq!(ids, vec![1, 500, 9934930]);
}

#[tokio::test]
async fn test_get_missing_order_is_404() {
    let storage = Arc::new(InMemoryOrderStorage::new());

    let response = app(storage).oneshot(get("/order/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await.code, ErrorCode::OrderNotFound);
}

#[tokio::test]
async fn test_storage_failure_is_500_without_details() {
    let storage = Arc::new(InMemoryOrderStorage::new());
    storage.set_unavailable(true);

    let response = app(storage).oneshot(get("/order/any")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let err = error_body(response).await;
    assert_eq!(err.code, ErrorCode::DatabaseError);
    assert_eq!(err.message, ErrorCode::DatabaseError.default_message());
}

// ============================================================================
// POST /order/
// ============================================================================

#[tokio::test]
async fn test_post_then_get() {
    let storage = Arc::new(InMemoryOrderStorage::new());
    let app = app(storage.clone());

    let response = app
        .clone()
        .oneshot(post("/order/", sample_order_json("posted")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(storage.order_count(), 1);

    let response = app.oneshot(get("/order/posted")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_post_without_trailing_slash() {
    let storage = Arc::new(InMemoryOrderStorage::new());

    let response = app(storage.clone())
        .oneshot(post("/order", sample_order_json("no-slash")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(storage.get_order_by_id("no-slash").await.is_ok());
}

#[tokio::test]
async fn test_post_malformed_body_is_400() {
    let storage = Arc::new(InMemoryOrderStorage::new());

    let response = app(storage.clone())
        .oneshot(post("/order/", b"{\"order_uid\": ".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, ErrorCode::InvalidInput);
    assert_eq!(storage.save_calls(), 0);
}

#[tokio::test]
async fn test_post_invalid_order_is_400() {
    let storage = Arc::new(InMemoryOrderStorage::new());
    let mut order = sample_order("dup-lines");
    order.items.push(order.items[0].clone());

    let response = app(storage.clone())
        .oneshot(post("/order/", serde_json::to_vec(&order).unwrap()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, ErrorCode::ValidationFailed);
    assert_eq!(storage.order_count(), 0);
}

#[tokio::test]
async fn test_post_duplicate_is_409() {
    let storage = Arc::new(InMemoryOrderStorage::new());
    storage.save_order(&sample_order("exists")).await.unwrap();

    let response = app(storage)
        .oneshot(post("/order/", sample_order_json("exists")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_body(response).await.code, ErrorCode::OrderAlreadyExists);
}

// ============================================================================
// HEALTH AND DOCS
// ============================================================================

#[tokio::test]
async fn test_health_reports_working() {
    let storage = Arc::new(InMemoryOrderStorage::new());
    storage.set_unavailable(true);

    let response = app(storage).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"working".to_vec());
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let storage = Arc::new(InMemoryOrderStorage::new());

    let response = app(storage).oneshot(get("/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(doc["paths"]["/order/{id}"].is_object());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let storage = Arc::new(InMemoryOrderStorage::new());

    let response = app(storage).oneshot(get("/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
