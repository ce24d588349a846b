//! Inventory Ledger
//!
//! Per-location stock balances for a product catalog, an append-only log of
//! every quantity change, and the sale, purchase and return processing that
//! drives them.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{middleware, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        catalog::CatalogService, ledger::InventoryLedger, locations::LocationService,
        transactions::TransactionProcessor,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub event_sender: Arc<EventSender>,
    pub catalog: CatalogService,
    pub locations: LocationService,
    pub ledger: InventoryLedger,
    pub transactions: TransactionProcessor,
}

impl AppState {
    /// Wires every service onto one connection pool and event channel.
    pub fn new(db: Arc<DbPool>, config: AppConfig, event_sender: Arc<EventSender>) -> Self {
        let catalog = CatalogService::new(
            db.clone(),
            event_sender.clone(),
            config.default_low_stock_threshold,
        );
        let locations = LocationService::new(db.clone(), event_sender.clone());
        let ledger = InventoryLedger::new(db.clone(), event_sender.clone());
        let transactions =
            TransactionProcessor::new(db.clone(), ledger.clone(), event_sender.clone());

        Self {
            db,
            config,
            event_sender,
            catalog,
            locations,
            ledger,
            transactions,
        }
    }

    /// Replaces the transaction processor, e.g. to install a different
    /// number generator.
    pub fn with_transactions(mut self, transactions: TransactionProcessor) -> Self {
        self.transactions = transactions;
        self
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(handlers::health::health_routes())
        .merge(handlers::products::product_routes())
        .merge(handlers::locations::location_routes())
        .merge(handlers::inventory::inventory_routes())
        .merge(handlers::transactions::transaction_routes())
}

/// Full application router with request ids, tracing, timeout and CORS.
pub fn app(state: AppState) -> Router {
    let cors = if state.config.cors_allow_any_origin {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::openapi_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(crate::tracing::trace_layer())
        .layer(middleware::from_fn(crate::tracing::request_id_middleware))
        .with_state(state)
}
