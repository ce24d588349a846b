use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::{
    entities::{
        inventory, location, product, stock_movement, transaction, transaction_item,
        MovementType, PaymentMethod, ReturnReason, TransactionStatus, TransactionType,
    },
    errors::ErrorResponse,
    handlers,
    handlers::common::PaginationMeta,
    services::{
        catalog::{NewProduct, ProductUpdate},
        ledger::{
            AdjustStock, InventoryOverview, LocationSummary, LowStockItem, TransferResult,
            TransferStock,
        },
        locations::NewLocation,
        transactions::{
            PurchaseRequest, ReturnRequest, SaleRequest, TransactionDetails, TransactionLine,
        },
    },
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Inventory Ledger API",
        version = "0.1.0",
        description = r#"
Per-location stock balances with an append-only movement log.

Every quantity change (sale, purchase, return, adjustment or transfer) updates a
balance and records a movement in the same database transaction. Balances never
go negative.

## Error Handling

Failures share one body:

```json
{
  "code": "INSUFFICIENT_STOCK",
  "error": "Unprocessable Entity",
  "message": "Insufficient stock at source location. Available: 3, Requested: 5",
  "details": { "available": 3, "requested": 5 },
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Products", description = "Product catalog"),
        (name = "Locations", description = "Stock-holding sites"),
        (name = "Inventory", description = "Balances, adjustments, transfers and movements"),
        (name = "Transactions", description = "Sales, purchases and returns"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Catalog
        handlers::products::list_products,
        handlers::products::create_product,
        handlers::products::get_product,
        handlers::products::update_product,
        handlers::products::delete_product,
        // Sites
        handlers::locations::list_locations,
        handlers::locations::create_location,
        handlers::locations::get_location,
        handlers::locations::delete_location,
        // Ledger
        handlers::inventory::inventory_overview,
        handlers::inventory::low_stock,
        handlers::inventory::balances_for_product,
        handlers::inventory::balances_for_location,
        handlers::inventory::get_balance,
        handlers::inventory::adjust_stock,
        handlers::inventory::transfer_stock,
        handlers::inventory::list_movements,
        handlers::inventory::movements_for_product,
        // Transactions
        handlers::transactions::list_transactions,
        handlers::transactions::get_transaction,
        handlers::transactions::create_sale,
        handlers::transactions::create_purchase,
        handlers::transactions::create_return,
        // Health
        handlers::health::liveness_check,
        handlers::health::readiness_check,
    ),
    components(
        schemas(
            product::Model,
            location::Model,
            inventory::Model,
            stock_movement::Model,
            transaction::Model,
            transaction_item::Model,
            MovementType,
            TransactionType,
            TransactionStatus,
            PaymentMethod,
            ReturnReason,
            NewProduct,
            ProductUpdate,
            NewLocation,
            AdjustStock,
            TransferStock,
            TransferResult,
            LowStockItem,
            LocationSummary,
            InventoryOverview,
            TransactionLine,
            SaleRequest,
            PurchaseRequest,
            ReturnRequest,
            TransactionDetails,
            PaginationMeta,
            ErrorResponse,
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_ledger_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Inventory Ledger API"));
        assert!(json.contains("/api/v1/inventory/transfer"));
        assert!(json.contains("/api/v1/transactions/return"));
        assert!(json.contains("InventoryBalance"));
    }
}
