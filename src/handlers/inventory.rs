use crate::{
    entities::{inventory, stock_movement},
    errors::ServiceError,
    handlers::common::{success_response, PaginatedResponse, PaginationParams},
    services::ledger::{AdjustStock, InventoryOverview, LowStockItem, TransferResult, TransferStock},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LowStockFilter {
    /// Restrict the report to one location
    pub location_id: Option<Uuid>,
}

/// Create the inventory router
pub fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/inventory/overview", get(inventory_overview))
        .route("/inventory/low-stock", get(low_stock))
        .route("/inventory/products/:product_id", get(balances_for_product))
        .route("/inventory/locations/:location_id", get(balances_for_location))
        .route(
            "/inventory/balance/:product_id/:location_id",
            get(get_balance),
        )
        .route("/inventory/adjust", post(adjust_stock))
        .route("/inventory/transfer", post(transfer_stock))
        .route("/inventory/movements", get(list_movements))
        .route(
            "/inventory/movements/products/:product_id",
            get(movements_for_product),
        )
}

/// Stock totals, value and low-stock report across active locations
#[utoipa::path(
    get,
    path = "/api/v1/inventory/overview",
    responses(
        (status = 200, description = "Inventory overview", body = InventoryOverview),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn inventory_overview(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.ledger.overview().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/low-stock",
    params(LowStockFilter),
    responses(
        (status = 200, description = "Balances at or below their threshold", body = [LowStockItem]),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn low_stock(
    State(state): State<AppState>,
    Query(filter): Query<LowStockFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.ledger.low_stock(filter.location_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/products/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Balances of the product at every location", body = [inventory::Model]),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn balances_for_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.ledger.balances_for_product(product_id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/locations/{location_id}",
    params(("location_id" = Uuid, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Balances held at the location", body = [inventory::Model]),
        (status = 404, description = "Location not found or inactive", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn balances_for_location(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.ledger.balances_for_location(location_id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/balance/{product_id}/{location_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID"),
        ("location_id" = Uuid, Path, description = "Location ID")
    ),
    responses(
        (status = 200, description = "Balance returned", body = inventory::Model),
        (status = 404, description = "No balance for this product at this location", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Path((product_id, location_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.ledger.get_balance(product_id, location_id).await?,
    ))
}

/// Adjust a single balance and record the movement
#[utoipa::path(
    post,
    path = "/api/v1/inventory/adjust",
    request_body = AdjustStock,
    responses(
        (status = 200, description = "Balance after the adjustment", body = inventory::Model),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or location not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    Json(payload): Json<AdjustStock>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.ledger.adjust(payload).await?))
}

/// Move stock between two locations
#[utoipa::path(
    post,
    path = "/api/v1/inventory/transfer",
    request_body = TransferStock,
    responses(
        (status = 200, description = "Balances on both sides", body = TransferResult),
        (status = 400, description = "Invalid request or same-location transfer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product, location or source balance not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock at source", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn transfer_stock(
    State(state): State<AppState>,
    Json(payload): Json<TransferStock>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.ledger.transfer(payload).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/movements",
    params(PaginationParams),
    responses(
        (status = 200, description = "Movement log, newest first"),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (page, per_page) = params.normalized();
    let (movements, total) = state.ledger.movements(page, per_page).await?;
    Ok(success_response(PaginatedResponse::new(
        movements, page, per_page, total,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/movements/products/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Movements of one product, newest first", body = [stock_movement::Model])
    ),
    tag = "Inventory"
)]
pub async fn movements_for_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.ledger.movements_for_product(product_id).await?,
    ))
}
