//! OpenAPI document for the Orders API

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::{health, order};
use orders_core::{Delivery, Item, Order, Payment};

/// OpenAPI document for the Orders API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Orders API",
        version = "0.1.0",
        description = "Point lookups and ingestion of order records",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8081", description = "Local Development")
    ),
    tags(
        (name = "Orders", description = "Order lookup and creation"),
        (name = "Health", description = "Liveness")
    ),
    paths(
        order::get_order,
        order::create_order,
        health::health,
    ),
    components(schemas(Order, Delivery, Payment, Item, ApiError, ErrorCode))
)]
pub struct ApiDoc;
