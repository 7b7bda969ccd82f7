//! Reservation Manager
//!
//! Creates, releases and lists time-bounded holds against `available`
//! stock. A hold that spans several inventory rows is stored as one
//! reservation row per row drawn from.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_movement::MovementType;
use crate::entities::inventory_reservation::{
    self, Entity as InventoryReservationEntity, ReservationType,
};
use crate::errors::ServiceError;
use crate::services::movements::{MovementRecorder, NewMovement};
use crate::services::stock_ledger::{
    apply_counter_change, items_for_product, CounterChange, StockLevel,
};

/// Longest hold a reservation may request: one year.
pub const MAX_RESERVATION_TTL_SECS: i64 = 366 * 24 * 60 * 60;

/// Input for [`ReservationManager::reserve`].
#[derive(Debug, Clone)]
pub struct ReserveStock {
    pub product_id: Uuid,
    pub quantity: i32,
    pub reserved_for: String,
    pub reservation_type: ReservationType,
    pub ttl_seconds: i64,
}

impl ReserveStock {
    pub fn new(
        product_id: Uuid,
        quantity: i32,
        reserved_for: impl Into<String>,
        reservation_type: ReservationType,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            product_id,
            quantity,
            reserved_for: reserved_for.into(),
            reservation_type,
            ttl_seconds,
        }
    }

    /// Expiry instant for a hold placed at `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ServiceError> {
        if self.ttl_seconds <= 0 || self.ttl_seconds > MAX_RESERVATION_TTL_SECS {
            return Err(ServiceError::ValidationError(format!(
                "ttl_seconds must be between 1 and {}, got {}",
                MAX_RESERVATION_TTL_SECS, self.ttl_seconds
            )));
        }
        Duration::try_seconds(self.ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "ttl_seconds {} is out of range",
                    self.ttl_seconds
                ))
            })
    }
}

/// Result of a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub product_id: Uuid,
    pub reserved_for: String,
    pub released_quantity: i32,
    pub reservations_released: usize,
}

/// Service for managing inventory reservations.
#[derive(Clone)]
pub struct ReservationManager {
    db_pool: Arc<DatabaseConnection>,
    recorder: MovementRecorder,
}

impl ReservationManager {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self {
            db_pool,
            recorder: MovementRecorder::new(),
        }
    }

    /// Moves `quantity` units from `available` to `reserved` across the
    /// product's rows in allocation order. All-or-nothing: on
    /// `InsufficientStock` no row, reservation or movement is written.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity, reserved_for = %request.reserved_for))]
    pub async fn reserve(
        &self,
        request: ReserveStock,
    ) -> Result<Vec<inventory_reservation::Model>, ServiceError> {
        ServiceError::ensure_positive("quantity", request.quantity)?;
        let now = Utc::now();
        let expires_at = request.expires_at(now)?;
        if request.reserved_for.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "reserved_for must not be empty".into(),
            ));
        }

        let start = std::time::Instant::now();

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let items = items_for_product(&txn, request.product_id).await?;

        let available = StockLevel::from_items(&items).available;
        if available < i64::from(request.quantity) {
            counter!("stock_ledger.reserve.insufficient", 1);
            info!(available, "Insufficient stock for reservation");
            return Err(insufficient(request.product_id, available, request.quantity));
        }

        let mut created = Vec::new();
        let mut remaining = request.quantity;
        for item in &items {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(item.available);
            if take == 0 {
                continue;
            }

            if !apply_counter_change(&txn, item.id, CounterChange::Reserve(take)).await? {
                counter!("stock_ledger.reserve.insufficient", 1);
                info!(inventory_item_id = %item.id, "Reservation lost a race for stock");
                return Err(insufficient(request.product_id, available, request.quantity));
            }

            let reservation = inventory_reservation::ActiveModel {
                product_id: Set(request.product_id),
                inventory_item_id: Set(item.id),
                quantity: Set(take),
                reserved_for: Set(request.reserved_for.clone()),
                reservation_type: Set(request.reservation_type),
                expires_at: Set(expires_at),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            self.recorder
                .append(
                    &txn,
                    NewMovement::new(
                        request.product_id,
                        item.id,
                        MovementType::Reserved,
                        take,
                        format!("reserved for {}", request.reservation_type.as_str()),
                        request.reserved_for.clone(),
                    )
                    .with_reference(
                        request.reserved_for.clone(),
                        request.reservation_type.as_str(),
                    ),
                )
                .await?;

            created.push(reservation);
            remaining -= take;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stock_ledger.reserve.success", 1);
        histogram!("stock_ledger.reserve.duration", start.elapsed());
        info!(
            rows = created.len(),
            expires_at = %expires_at,
            "Reserved stock"
        );

        Ok(created)
    }

    /// Releases the owner's holds on a product back to `available`.
    ///
    /// With `quantity = None` every reservation row of the owner is released;
    /// with `Some(q)` only the earliest-expiring row holding exactly `q`.
    /// Returns `ReservationNotFound` when nothing was released, which callers
    /// treat as an already-released no-op.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        product_id: Uuid,
        reserved_for: &str,
        quantity: Option<i32>,
    ) -> Result<ReleaseOutcome, ServiceError> {
        if let Some(q) = quantity {
            ServiceError::ensure_positive("quantity", q)?;
        }

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let mut candidates = InventoryReservationEntity::find()
            .filter(inventory_reservation::Column::ProductId.eq(product_id))
            .filter(inventory_reservation::Column::ReservedFor.eq(reserved_for))
            .order_by_asc(inventory_reservation::Column::ExpiresAt)
            .order_by_asc(inventory_reservation::Column::CreatedAt)
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if let Some(q) = quantity {
            candidates = candidates
                .into_iter()
                .filter(|r| r.quantity == q)
                .take(1)
                .collect();
        }

        let mut released_quantity = 0;
        let mut reservations_released = 0;
        for reservation in &candidates {
            let claimed = InventoryReservationEntity::delete_by_id(reservation.id)
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            if claimed.rows_affected == 0 {
                continue;
            }

            if !apply_counter_change(
                &txn,
                reservation.inventory_item_id,
                CounterChange::Unreserve(reservation.quantity),
            )
            .await?
            {
                warn!(
                    reservation_id = %reservation.id,
                    inventory_item_id = %reservation.inventory_item_id,
                    "Reserved counter is lower than the reservation being released"
                );
                return Err(ServiceError::InternalError(format!(
                    "reserved counter of inventory item {} is inconsistent",
                    reservation.inventory_item_id
                )));
            }

            self.recorder
                .append(
                    &txn,
                    NewMovement::new(
                        product_id,
                        reservation.inventory_item_id,
                        MovementType::Released,
                        reservation.quantity,
                        "reservation released",
                        reserved_for,
                    )
                    .with_reference(reserved_for, reservation.reservation_type.as_str()),
                )
                .await?;

            released_quantity += reservation.quantity;
            reservations_released += 1;
        }

        if reservations_released == 0 {
            counter!("stock_ledger.release.not_found", 1);
            return Err(ServiceError::ReservationNotFound(format!(
                "no live reservation for {} on product {}",
                reserved_for, product_id
            )));
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stock_ledger.release.success", 1);
        info!(
            released_quantity,
            reservations_released, "Released reservation"
        );

        Ok(ReleaseOutcome {
            product_id,
            reserved_for: reserved_for.to_string(),
            released_quantity,
            reservations_released,
        })
    }

    /// Every reservation row that still exists, earliest expiry first.
    /// Rows past `expires_at` stay listed until the sweeper releases them.
    #[instrument(skip(self))]
    pub async fn list_live(
        &self,
        product_id: Option<Uuid>,
    ) -> Result<Vec<inventory_reservation::Model>, ServiceError> {
        let mut query = InventoryReservationEntity::find();
        if let Some(product_id) = product_id {
            query = query.filter(inventory_reservation::Column::ProductId.eq(product_id));
        }
        query
            .order_by_asc(inventory_reservation::Column::ExpiresAt)
            .order_by_asc(inventory_reservation::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Reservations with `expires_at < now`.
    pub async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<inventory_reservation::Model>, ServiceError> {
        InventoryReservationEntity::find()
            .filter(inventory_reservation::Column::ExpiresAt.lt(now))
            .order_by_asc(inventory_reservation::Column::ExpiresAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

fn insufficient(product_id: Uuid, available: i64, requested: i32) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "product {} has {} available, {} requested",
        product_id, available, requested
    ))
}
