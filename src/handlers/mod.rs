pub mod health;
pub mod inventory;

use axum::Router;
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::services::InventoryEngine;

/// State the handlers need: access to the inventory engine.
pub trait InventoryHandlerState: Clone + Send + Sync + 'static {
    fn engine(&self) -> &InventoryEngine;
}

/// Default router state.
#[derive(Clone)]
pub struct AppState {
    pub engine: InventoryEngine,
}

impl AppState {
    pub fn new(engine: InventoryEngine) -> Self {
        Self { engine }
    }
}

impl InventoryHandlerState for AppState {
    fn engine(&self) -> &InventoryEngine {
        &self.engine
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Full HTTP surface of the stock ledger.
pub fn api_routes<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new()
        .merge(health::health_routes::<S>())
        .nest("/api/v1/inventory", inventory::inventory_router::<S>())
        .nest("/api/v1/reservations", inventory::reservations_router::<S>())
        .nest("/api/v1/alerts", inventory::alerts_router::<S>())
        .nest("/api/v1/analytics", inventory::analytics_router::<S>())
}

/// Router bound to an engine, with request ids, request tracing and a
/// request timeout.
pub fn router(engine: InventoryEngine) -> Router {
    api_routes::<AppState>()
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(AppState::new(engine))
}
