#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use stateset_stock_ledger::{
    config::InventorySettings,
    db::{self, DbConfig},
    events::{Event, EventSender},
    handlers,
    services::{stock_ledger::ReceiveStock, InventoryEngine},
    ServiceError,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Engine backed by a fresh in-memory SQLite database, with the event
/// channel's receiving end kept for assertions.
pub struct TestLedger {
    pub engine: InventoryEngine,
    pub events: mpsc::Receiver<Event>,
    dir: Option<TempDir>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_settings(InventorySettings::default()).await
    }

    pub async fn with_settings(settings: InventorySettings) -> Self {
        Self::open(&DbConfig::in_memory(), settings, None).await
    }

    /// Engine on a SQLite file in a temp dir with a multi-connection pool,
    /// so concurrent operations run on separate connections.
    pub async fn file_backed(max_connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = DbConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display()),
            max_connections,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        Self::open(&config, InventorySettings::default(), Some(dir)).await
    }

    async fn open(config: &DbConfig, settings: InventorySettings, dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_with_config(config)
            .await
            .expect("failed to open database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (tx, rx) = mpsc::channel(4096);
        let engine = InventoryEngine::new(Arc::new(pool), settings)
            .with_event_sender(EventSender::new(tx));

        Self {
            engine,
            events: rx,
            dir,
        }
    }

    /// Receives `quantity` units of `sku` for `product_id` at 5.00 each.
    pub async fn seed(&self, product_id: Uuid, sku: &str, quantity: i32) -> Uuid {
        self.engine
            .receive_stock(
                product_id,
                sku,
                quantity,
                Decimal::new(500, 2),
                "initial stock",
                "admin",
                None,
                None,
            )
            .await
            .expect("seed receive")
            .inventory_item_id
    }

    pub async fn seed_with(&self, request: ReceiveStock) -> Uuid {
        self.engine
            .receive(request)
            .await
            .expect("seed receive")
            .inventory_item_id
    }

    /// Asserts conservation and ledger replay for a product.
    pub async fn assert_consistent(&self, product_id: Uuid) {
        let report = self
            .engine
            .reconcile(product_id)
            .await
            .expect("reconcile");
        assert!(report.ledger_matches, "ledger drifted: {:?}", report);
        assert!(report.reservations_match, "reservations drifted: {:?}", report);
        assert!(report.counters.available >= 0);
        assert!(report.counters.reserved >= 0);
    }

    /// Everything published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn router(&self) -> TestRouter {
        TestRouter {
            router: handlers::router(self.engine.clone()),
        }
    }
}

/// Re-runs `op` while SQLite reports the file as locked by another
/// connection. A failed attempt rolls back as a whole, so retrying is safe.
pub async fn retry_while_locked<T, F, Fut>(mut op: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    for _ in 0..100 {
        match op().await {
            Err(ServiceError::StorageUnavailable(err)) if is_locked(&err.to_string()) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            other => return other,
        }
    }
    op().await
}

fn is_locked(message: &str) -> bool {
    message.contains("database is locked") || message.contains("database table is locked")
}

/// Thin wrapper issuing one-shot requests against the HTTP router.
pub struct TestRouter {
    router: Router,
}

impl TestRouter {
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("response body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None).await
    }
}
