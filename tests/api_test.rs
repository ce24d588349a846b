mod common;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use common::{response_json, TestApp};

async fn create(app: &TestApp, uri: &str, body: Value) -> Value {
    let response = app.request(Method::POST, uri, Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED, "POST {}", uri);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    body["data"].clone()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["status"], "up");

    let response = app.request(Method::GET, "/api/v1/health/ready", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["status"], "ready");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/health", None).await;
    let header = response
        .headers()
        .get("x-request-id")
        .expect("request id header");
    assert!(!header.to_str().unwrap().is_empty());
}

#[tokio::test]
async fn catalog_and_sites_round_trip() {
    let app = TestApp::new().await;

    let product = create(
        &app,
        "/api/v1/products",
        json!({ "name": "Widget", "sku": "W-1", "price": "15.99" }),
    )
    .await;
    let product_id = product["id"].as_str().unwrap().to_string();
    assert_eq!(product["low_stock_threshold"], 10);

    let response = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({ "name": "Other", "sku": "W-1", "price": "1.00" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(response).await["code"], "DUPLICATE_CONFLICT");

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/products/{}", product_id),
            Some(json!({ "name": "Widget Pro" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["name"], "Widget Pro");

    let location = create(&app, "/api/v1/locations", json!({ "name": "Main Street" })).await;
    let location_id = location["id"].as_str().unwrap().to_string();

    let response = app.request(Method::GET, "/api/v1/locations", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"].as_array().unwrap().len(), 1);

    let response = app
        .request(Method::DELETE, &format!("/api/v1/locations/{}", location_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::GET, &format!("/api/v1/locations/{}", location_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn invalid_product_is_a_validation_error() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({ "name": "", "price": "0" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn stock_flow_over_http() {
    let app = TestApp::new().await;
    let product = create(
        &app,
        "/api/v1/products",
        json!({ "name": "Widget", "price": "15.99" }),
    )
    .await;
    let warehouse = create(&app, "/api/v1/locations", json!({ "name": "Warehouse" })).await;
    let store = create(&app, "/api/v1/locations", json!({ "name": "Storefront" })).await;
    let (p, w, s) = (
        product["id"].clone(),
        warehouse["id"].clone(),
        store["id"].clone(),
    );

    let response = app
        .request(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_id": p,
                "location_id": w,
                "quantity": 50,
                "movement_type": "INITIAL_STOCK"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["quantity"], 50);

    let response = app
        .request(
            Method::POST,
            "/api/v1/inventory/transfer",
            Some(json!({
                "product_id": p,
                "from_location_id": w,
                "to_location_id": s,
                "quantity": 60
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error = response_json(response).await;
    assert_eq!(error["code"], "INSUFFICIENT_STOCK");
    assert_eq!(error["details"]["available"], 50);
    assert_eq!(error["details"]["requested"], 60);

    let response = app
        .request(
            Method::POST,
            "/api/v1/inventory/transfer",
            Some(json!({
                "product_id": p,
                "from_location_id": w,
                "to_location_id": w,
                "quantity": 1
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["code"], "INVALID_TRANSFER");

    let response = app
        .request(
            Method::POST,
            "/api/v1/inventory/transfer",
            Some(json!({
                "product_id": p,
                "from_location_id": w,
                "to_location_id": s,
                "quantity": 20
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let moved = response_json(response).await;
    assert_eq!(moved["data"]["from"]["quantity"], 30);
    assert_eq!(moved["data"]["to"]["quantity"], 20);

    let sale = create(
        &app,
        "/api/v1/transactions/sale",
        json!({
            "location_id": s,
            "items": [{ "product_id": p, "quantity": 3 }],
            "payment_method": "CASH"
        }),
    )
    .await;
    assert_eq!(sale["transaction_type"], "SALE");
    assert_eq!(sale["status"], "COMPLETED");
    assert_eq!(sale["items"].as_array().unwrap().len(), 1);

    let response = app
        .request(
            Method::POST,
            "/api/v1/transactions/return",
            Some(json!({
                "original_transaction_id": sale["id"],
                "location_id": s,
                "product_id": p,
                "return_quantity": 4,
                "reason": "DEFECTIVE"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["code"], "INVALID_RETURN");

    let response = app
        .request(
            Method::GET,
            &format!(
                "/api/v1/inventory/balance/{}/{}",
                p.as_str().unwrap(),
                s.as_str().unwrap()
            ),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["quantity"], 17);

    let response = app
        .request(Method::GET, "/api/v1/inventory/movements?page=1&per_page=2", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = response_json(response).await;
    assert_eq!(page["data"]["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["data"]["pagination"]["total"], 4);
    assert_eq!(page["data"]["pagination"]["total_pages"], 2);

    let response = app.request(Method::GET, "/api/v1/transactions", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["pagination"]["total"], 1);

    let response = app.request(Method::GET, "/api/v1/inventory/overview", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(response).await["data"]["total_stock_units"],
        47
    );
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = response_json(response).await;
    assert!(doc["paths"]["/api/v1/transactions/sale"].is_object());
}
