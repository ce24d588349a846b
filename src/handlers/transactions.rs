use crate::{
    errors::ServiceError,
    handlers::common::{created_response, success_response, PaginatedResponse, PaginationParams},
    services::transactions::{PurchaseRequest, ReturnRequest, SaleRequest, TransactionDetails},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

pub fn transaction_routes() -> Router<AppState> {
    Router::new()
        .route("/transactions", get(list_transactions))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/sale", post(create_sale))
        .route("/transactions/purchase", post(create_purchase))
        .route("/transactions/return", post(create_return))
}

#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    params(PaginationParams),
    responses(
        (status = 200, description = "Transactions, newest first"),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (page, per_page) = params.normalized();
    let (transactions, total) = state.transactions.list_transactions(page, per_page).await?;
    Ok(success_response(PaginatedResponse::new(
        transactions,
        page,
        per_page,
        total,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction with its items", body = TransactionDetails),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.transactions.get_transaction(id).await?))
}

/// Record a sale and take the sold quantities out of stock
#[utoipa::path(
    post,
    path = "/api/v1/transactions/sale",
    request_body = SaleRequest,
    responses(
        (status = 201, description = "Sale completed", body = TransactionDetails),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or location not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transaction number collision", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn create_sale(
    State(state): State<AppState>,
    Json(payload): Json<SaleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state.transactions.process_sale(payload).await?;
    Ok(created_response(sale))
}

/// Record a purchase and add the received quantities to stock
#[utoipa::path(
    post,
    path = "/api/v1/transactions/purchase",
    request_body = PurchaseRequest,
    responses(
        (status = 201, description = "Purchase completed", body = TransactionDetails),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or location not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transaction number collision", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn create_purchase(
    State(state): State<AppState>,
    Json(payload): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let purchase = state.transactions.process_purchase(payload).await?;
    Ok(created_response(purchase))
}

/// Return part of an earlier sale to stock
#[utoipa::path(
    post,
    path = "/api/v1/transactions/return",
    request_body = ReturnRequest,
    responses(
        (status = 201, description = "Return completed", body = TransactionDetails),
        (status = 400, description = "Invalid request or return quantity too large", body = crate::errors::ErrorResponse),
        (status = 404, description = "Original transaction, product or location not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transaction number collision", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn create_return(
    State(state): State<AppState>,
    Json(payload): Json<ReturnRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let returned = state.transactions.process_return(payload).await?;
    Ok(created_response(returned))
}
