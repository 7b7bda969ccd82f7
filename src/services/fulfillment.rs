use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_movement::MovementType;
use crate::entities::inventory_reservation::{self, Entity as InventoryReservationEntity};
use crate::errors::ServiceError;
use crate::services::movements::{MovementRecorder, NewMovement};
use crate::services::stock_ledger::{apply_counter_change, CounterChange};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentOutcome {
    pub product_id: Uuid,
    pub order_id: String,
    pub quantity: i32,
    pub reservations_consumed: usize,
    /// Quantity still held for the order after this fulfillment.
    pub remaining_reserved: i32,
}

/// Converts held stock into sold stock.
#[derive(Clone)]
pub struct FulfillmentCoordinator {
    db_pool: Arc<DatabaseConnection>,
    recorder: MovementRecorder,
}

impl FulfillmentCoordinator {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self {
            db_pool,
            recorder: MovementRecorder::new(),
        }
    }

    /// Consumes `quantity` units of the reservations held for `order_id`,
    /// oldest reservation first, moving them from `reserved` to `sold`.
    ///
    /// Fails with `InsufficientReservedQuantity` unless the order's
    /// reservations on the product sum to at least `quantity`.
    #[instrument(skip(self))]
    pub async fn fulfill(
        &self,
        product_id: Uuid,
        quantity: i32,
        order_id: &str,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        ServiceError::ensure_positive("quantity", quantity)?;

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let held = InventoryReservationEntity::find()
            .filter(inventory_reservation::Column::ProductId.eq(product_id))
            .filter(inventory_reservation::Column::ReservedFor.eq(order_id))
            .order_by_asc(inventory_reservation::Column::CreatedAt)
            .order_by_asc(inventory_reservation::Column::Id)
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let held_total: i64 = held.iter().map(|r| i64::from(r.quantity)).sum();
        if held_total < i64::from(quantity) {
            counter!("stock_ledger.fulfill.insufficient_reserved", 1);
            return Err(ServiceError::InsufficientReservedQuantity(format!(
                "order {} holds {} of product {}, {} requested",
                order_id, held_total, product_id, quantity
            )));
        }

        let mut remaining = quantity;
        let mut consumed = 0;
        for reservation in &held {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(reservation.quantity);

            let claimed = InventoryReservationEntity::delete_by_id(reservation.id)
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            if claimed.rows_affected == 0 {
                return Err(ServiceError::InsufficientReservedQuantity(format!(
                    "reservation {} was released concurrently",
                    reservation.id
                )));
            }

            if take < reservation.quantity {
                inventory_reservation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(reservation.product_id),
                    inventory_item_id: Set(reservation.inventory_item_id),
                    quantity: Set(reservation.quantity - take),
                    reserved_for: Set(reservation.reserved_for.clone()),
                    reservation_type: Set(reservation.reservation_type),
                    expires_at: Set(reservation.expires_at),
                    created_at: Set(reservation.created_at),
                }
                .insert(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            }

            if !apply_counter_change(
                &txn,
                reservation.inventory_item_id,
                CounterChange::Sell(take),
            )
            .await?
            {
                warn!(
                    reservation_id = %reservation.id,
                    inventory_item_id = %reservation.inventory_item_id,
                    "Reserved counter is lower than the reservation being fulfilled"
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
                        MovementType::Out,
                        take,
                        "order fulfilled",
                        order_id,
                    )
                    .with_reference(order_id, "order"),
                )
                .await?;

            remaining -= take;
            consumed += 1;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stock_ledger.fulfill.success", 1);
        counter!("stock_ledger.fulfill.units", quantity as u64);
        info!(reservations_consumed = consumed, "Fulfilled reservation");

        Ok(FulfillmentOutcome {
            product_id,
            order_id: order_id.to_string(),
            quantity,
            reservations_consumed: consumed,
            remaining_reserved: (held_total - i64::from(quantity)) as i32,
        })
    }
}
