//! MovementRecorder: the append-only stock ledger.
//!
//! Every counter change made by the stock ledger, reservation manager and
//! fulfillment coordinator is paired with one movement row written on the
//! same transaction. Rows are never updated or deleted, so folding a
//! product's movements reproduces its counters (see [`LedgerTotals`]).

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::entities::inventory_movement::{
    self, Entity as InventoryMovementEntity, MovementDirection, MovementType,
};
use crate::errors::ServiceError;

/// A movement about to be appended.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub inventory_item_id: Uuid,
    pub movement_type: MovementType,
    pub direction: MovementDirection,
    pub quantity: i32,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub reason: String,
    pub cost_per_unit: Option<Decimal>,
    pub created_by: String,
}

impl NewMovement {
    /// Builds a movement whose direction follows from its type. Adjustments
    /// should use [`NewMovement::adjustment`] instead.
    pub fn new(
        product_id: Uuid,
        inventory_item_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
        reason: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let direction = match movement_type {
            MovementType::In | MovementType::Released => MovementDirection::Increase,
            MovementType::Out | MovementType::Reserved | MovementType::Adjustment => {
                MovementDirection::Decrease
            }
        };
        Self {
            product_id,
            inventory_item_id,
            movement_type,
            direction,
            quantity,
            reference_id: None,
            reference_type: None,
            reason: reason.into(),
            cost_per_unit: None,
            created_by: created_by.into(),
        }
    }

    /// Signed adjustment of `available`; the stored quantity is the absolute value.
    pub fn adjustment(
        product_id: Uuid,
        inventory_item_id: Uuid,
        delta: i32,
        reason: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let mut movement = Self::new(
            product_id,
            inventory_item_id,
            MovementType::Adjustment,
            delta.abs(),
            reason,
            created_by,
        );
        movement.direction = if delta >= 0 {
            MovementDirection::Increase
        } else {
            MovementDirection::Decrease
        };
        movement
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>, reference_type: &str) -> Self {
        self.reference_id = Some(reference_id.into());
        self.reference_type = Some(reference_type.to_string());
        self
    }

    pub fn with_cost(mut self, cost_per_unit: Decimal) -> Self {
        self.cost_per_unit = Some(cost_per_unit);
        self
    }
}

/// Counters reconstructed from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub available: i64,
    pub reserved: i64,
    pub sold: i64,
}

impl LedgerTotals {
    pub fn apply(&mut self, movement: &inventory_movement::Model) {
        let quantity = i64::from(movement.quantity);
        match movement.movement_type {
            MovementType::In => self.available += quantity,
            MovementType::Adjustment => match movement.direction {
                MovementDirection::Increase => self.available += quantity,
                MovementDirection::Decrease => self.available -= quantity,
            },
            MovementType::Reserved => {
                self.available -= quantity;
                self.reserved += quantity;
            }
            MovementType::Released => {
                self.reserved -= quantity;
                self.available += quantity;
            }
            MovementType::Out => {
                self.reserved -= quantity;
                self.sold += quantity;
            }
        }
    }

    pub fn fold<'a, I>(movements: I) -> Self
    where
        I: IntoIterator<Item = &'a inventory_movement::Model>,
    {
        movements.into_iter().fold(Self::default(), |mut totals, m| {
            totals.apply(m);
            totals
        })
    }
}

/// Write side of the ledger plus the replay used by reconciliation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovementRecorder;

impl MovementRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Appends one movement on `conn`. Callers pass their open transaction so
    /// a failed append aborts the counter change it records.
    pub async fn append<C>(
        &self,
        conn: &C,
        entry: NewMovement,
    ) -> Result<inventory_movement::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        ServiceError::ensure_positive("movement quantity", entry.quantity)?;

        let movement = inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(entry.product_id),
            inventory_item_id: Set(entry.inventory_item_id),
            movement_type: Set(entry.movement_type),
            direction: Set(entry.direction),
            quantity: Set(entry.quantity),
            reference_id: Set(entry.reference_id),
            reference_type: Set(entry.reference_type),
            reason: Set(entry.reason),
            cost_per_unit: Set(entry.cost_per_unit),
            created_by: Set(entry.created_by),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        debug!(
            movement_id = %movement.id,
            product_id = %movement.product_id,
            movement_type = movement.movement_type.as_str(),
            quantity = movement.quantity,
            "Appended inventory movement"
        );

        Ok(movement)
    }

    /// All movements for a product, oldest first.
    pub async fn list_for_product<C>(
        &self,
        conn: &C,
        product_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        InventoryMovementEntity::find()
            .filter(inventory_movement::Column::ProductId.eq(product_id))
            .order_by_asc(inventory_movement::Column::CreatedAt)
            .order_by_asc(inventory_movement::Column::Id)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Folds a product's movements into counters.
    pub async fn replay<C>(&self, conn: &C, product_id: Uuid) -> Result<LedgerTotals, ServiceError>
    where
        C: ConnectionTrait,
    {
        let movements = self.list_for_product(conn, product_id).await?;
        Ok(LedgerTotals::fold(&movements))
    }
}
