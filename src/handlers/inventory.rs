use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::entities::inventory_reservation::ReservationType;
use crate::errors::ServiceError;
use crate::handlers::InventoryHandlerState;
use crate::services::stock_ledger::ReceiveStock;

#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveStockRequest {
    #[validate(length(min = 1, max = 128))]
    pub sku: String,
    pub quantity: i32,
    pub cost_per_unit: Decimal,
    #[validate(length(max = 512))]
    #[serde(default)]
    pub reason: String,
    #[validate(length(min = 1, max = 128))]
    pub actor: String,
    pub batch_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub reorder_point: Option<i32>,
    pub reorder_quantity: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustStockRequest {
    pub delta: i32,
    #[validate(length(min = 1, max = 512))]
    pub reason: String,
    #[validate(length(min = 1, max = 128))]
    pub actor: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReserveStockRequest {
    pub quantity: i32,
    #[validate(length(min = 1, max = 255))]
    pub reserved_for: String,
    #[serde(default = "default_reservation_type")]
    pub reservation_type: ReservationType,
    /// Falls back to the configured default TTL. Capped at one year.
    #[validate(range(min = 1, max = 31622400))]
    pub ttl_seconds: Option<i64>,
}

fn default_reservation_type() -> ReservationType {
    ReservationType::Cart
}

#[derive(Debug, Deserialize, Validate)]
pub struct FulfillRequest {
    pub quantity: i32,
    #[validate(length(min = 1, max = 255))]
    pub order_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseQuery {
    pub quantity: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReservationFilters {
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertFilters {
    #[serde(default)]
    pub acknowledged: bool,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: Uuid,
    pub available: i64,
    pub reserved: i64,
    pub sold: i64,
    pub total: i64,
}

/// Routes nested under `/api/v1/inventory/:product_id`.
pub fn inventory_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new()
        .route("/:product_id/stock", get(get_stock::<S>))
        .route("/:product_id/receive", post(receive_stock::<S>))
        .route("/:product_id/adjust", post(adjust_stock::<S>))
        .route("/:product_id/reservations", post(reserve_stock::<S>))
        .route(
            "/:product_id/reservations/:reserved_for",
            delete(release_reservation::<S>),
        )
        .route("/:product_id/fulfill", post(fulfill_order::<S>))
        .route("/:product_id/reconciliation", get(reconcile_product::<S>))
}

pub fn reservations_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new().route("/", get(list_reservations::<S>))
}

pub fn alerts_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new().route("/", get(list_alerts::<S>))
}

pub fn analytics_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new().route("/summary", get(analytics_summary::<S>))
}

pub async fn get_stock<S>(
    State(state): State<S>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let level = state.engine().get_stock(product_id).await?;
    Ok(Json(StockResponse {
        product_id,
        available: level.available,
        reserved: level.reserved,
        sold: level.sold,
        total: level.total,
    }))
}

pub async fn receive_stock<S>(
    State(state): State<S>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<ReceiveStockRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    payload.validate()?;

    let mut request = ReceiveStock::new(
        product_id,
        payload.sku,
        payload.quantity,
        payload.cost_per_unit,
        payload.reason,
        payload.actor,
    );
    request.batch_number = payload.batch_number;
    request.expiration_date = payload.expiration_date;
    request.location = payload.location;
    request.reorder_point = payload.reorder_point;
    request.reorder_quantity = payload.reorder_quantity;

    let outcome = state.engine().receive(request).await?;
    let status = if outcome.created_item {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

pub async fn adjust_stock<S>(
    State(state): State<S>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    payload.validate()?;
    let outcome = state
        .engine()
        .adjust(product_id, payload.delta, &payload.reason, &payload.actor)
        .await?;
    Ok(Json(outcome))
}

pub async fn reserve_stock<S>(
    State(state): State<S>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<ReserveStockRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    payload.validate()?;
    let engine = state.engine();
    let ttl_seconds = payload
        .ttl_seconds
        .unwrap_or_else(|| {
            i64::try_from(engine.settings().default_reservation_ttl_secs).unwrap_or(i64::MAX)
        });

    let reservations = engine
        .reserve(
            product_id,
            payload.quantity,
            &payload.reserved_for,
            payload.reservation_type,
            ttl_seconds,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reservations)))
}

pub async fn release_reservation<S>(
    State(state): State<S>,
    Path((product_id, reserved_for)): Path<(Uuid, String)>,
    Query(query): Query<ReleaseQuery>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let outcome = state
        .engine()
        .release(product_id, &reserved_for, query.quantity)
        .await?;
    Ok(Json(outcome))
}

pub async fn fulfill_order<S>(
    State(state): State<S>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<FulfillRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    payload.validate()?;
    let outcome = state
        .engine()
        .fulfill(product_id, payload.quantity, &payload.order_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn reconcile_product<S>(
    State(state): State<S>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    Ok(Json(state.engine().reconcile(product_id).await?))
}

pub async fn list_reservations<S>(
    State(state): State<S>,
    Query(filters): Query<ReservationFilters>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    Ok(Json(state.engine().list_live(filters.product_id).await?))
}

pub async fn list_alerts<S>(
    State(state): State<S>,
    Query(filters): Query<AlertFilters>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    Ok(Json(state.engine().list_alerts(filters.acknowledged).await?))
}

pub async fn analytics_summary<S>(State(state): State<S>) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    Ok(Json(state.engine().get_analytics_summary().await?))
}
