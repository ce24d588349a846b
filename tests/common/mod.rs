#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use inventory_ledger::{
    config::AppConfig,
    db,
    entities::{inventory, location, product, MovementType},
    events::{Event, EventSender},
    services::{
        catalog::NewProduct,
        ledger::AdjustStock,
        locations::NewLocation,
        transactions::{TransactionNumberGenerator, TransactionProcessor},
    },
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub events: mpsc::Receiver<Event>,
    _dir: Option<TempDir>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:");
        cfg.environment = "test".to_string();
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        Self::with_config(cfg, None).await
    }

    /// A database file in a temporary directory behind the default pool
    /// size, so concurrent requests run on separate connections.
    pub async fn file_backed() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("ledger.db").display()
        );
        let mut cfg = AppConfig::new(url);
        cfg.environment = "test".to_string();
        Self::with_config(cfg, Some(dir)).await
    }

    /// [`TestApp::file_backed`] with collision-free transaction numbers.
    pub async fn file_backed_with_sequential_numbers() -> Self {
        Self::file_backed()
            .await
            .replace_number_generator(Arc::new(SequentialNumbers::default()))
    }

    async fn with_config(cfg: AppConfig, dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, events) = EventSender::channel(1024);
        let state = AppState::new(Arc::new(pool), cfg, Arc::new(event_sender));
        let router = inventory_ledger::app(state.clone());

        Self {
            router,
            state,
            events,
            _dir: dir,
        }
    }

    /// Same as [`TestApp::new`] but with a custom transaction number source.
    pub async fn with_number_generator(numbers: Arc<dyn TransactionNumberGenerator>) -> Self {
        Self::new().await.replace_number_generator(numbers)
    }

    fn replace_number_generator(self, numbers: Arc<dyn TransactionNumberGenerator>) -> Self {
        let processor = TransactionProcessor::with_number_generator(
            self.state.db.clone(),
            self.state.ledger.clone(),
            self.state.event_sender.clone(),
            numbers,
        );
        let state = self.state.with_transactions(processor);
        let router = inventory_ledger::app(state.clone());
        Self {
            router,
            state,
            events: self.events,
            _dir: self._dir,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    /// Events published so far, in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        self.state
            .catalog
            .create_product(NewProduct {
                name: name.to_string(),
                description: None,
                sku: Some(format!("SKU-{}", Uuid::new_v4().simple())),
                category: None,
                price,
                low_stock_threshold: Some(10),
            })
            .await
            .expect("create product")
    }

    pub async fn seed_location(&self, name: &str) -> location::Model {
        self.state
            .locations
            .create_location(NewLocation {
                name: name.to_string(),
                address: None,
                city: None,
                state: None,
                zip_code: None,
            })
            .await
            .expect("create location")
    }

    /// Puts `quantity` units of stock on hand through an initial-stock adjustment.
    pub async fn seed_stock(
        &self,
        product_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    ) -> inventory::Model {
        self.state
            .ledger
            .adjust(AdjustStock {
                product_id,
                location_id,
                quantity,
                movement_type: MovementType::InitialStock,
                reference: None,
                notes: None,
                created_by: Some("test".to_string()),
            })
            .await
            .expect("seed stock")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Always hands out the same number.
pub struct FixedNumbers(pub &'static str);

impl TransactionNumberGenerator for FixedNumbers {
    fn next_number(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.0)
    }
}

/// Hands out `{PREFIX}-000001`, `{PREFIX}-000002`, ... so concurrent
/// transactions never collide on their number.
#[derive(Default)]
pub struct SequentialNumbers(AtomicU32);

impl TransactionNumberGenerator for SequentialNumbers {
    fn next_number(&self, prefix: &str) -> String {
        let next = self.0.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{:06}", prefix, next)
    }
}
