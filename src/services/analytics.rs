use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    entities::{
        inventory_item::{self, Entity as InventoryEntity},
        inventory_movement::{self, Entity as MovementEntity, MovementType},
    },
    errors::ServiceError,
    services::alerts::stock_alert_types,
    services::stock_ledger::{reorder_point, StockLevel},
};
use crate::entities::stock_alert::AlertType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopMover {
    pub product_id: Uuid,
    pub quantity_out: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_products: usize,
    /// Σ (available + reserved) × cost_per_unit over all rows.
    pub total_value: Decimal,
    pub low_stock_count: usize,
    pub out_of_stock_count: usize,
    pub top_moving: Vec<TopMover>,
    pub window_days: i64,
    pub generated_at: DateTime<Utc>,
}

/// Read-only rollup for external reporting.
#[derive(Clone)]
pub struct AnalyticsService {
    db: Arc<DatabaseConnection>,
    window_days: i64,
    top_moving_limit: usize,
}

impl AnalyticsService {
    pub fn new(db: Arc<DatabaseConnection>, window_days: i64, top_moving_limit: usize) -> Self {
        Self {
            db,
            window_days,
            top_moving_limit,
        }
    }

    pub async fn summary(&self) -> Result<AnalyticsSummary, ServiceError> {
        self.summary_at(Utc::now()).await
    }

    pub async fn summary_at(&self, now: DateTime<Utc>) -> Result<AnalyticsSummary, ServiceError> {
        info!("Generating inventory analytics summary");
        let db = &*self.db;

        let items = InventoryEntity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let total_value = inventory_value(&items)?;
        let mut by_product: HashMap<Uuid, Vec<inventory_item::Model>> = HashMap::new();
        for item in items {
            by_product.entry(item.product_id).or_default().push(item);
        }

        let mut low_stock_count = 0;
        let mut out_of_stock_count = 0;
        for rows in by_product.values() {
            let level = StockLevel::from_items(rows);
            for alert_type in stock_alert_types(level.available, reorder_point(rows)) {
                match alert_type {
                    AlertType::LowStock => low_stock_count += 1,
                    AlertType::OutOfStock => out_of_stock_count += 1,
                    _ => {}
                }
            }
        }

        let since = Duration::try_days(self.window_days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let outgoing = MovementEntity::find()
            .filter(inventory_movement::Column::MovementType.eq(MovementType::Out))
            .filter(inventory_movement::Column::CreatedAt.gte(since))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(AnalyticsSummary {
            total_products: by_product.len(),
            total_value,
            low_stock_count,
            out_of_stock_count,
            top_moving: rank_movers(&outgoing, self.top_moving_limit),
            window_days: self.window_days,
            generated_at: now,
        })
    }
}

/// Σ on_hand × cost_per_unit, failing instead of wrapping on overflow.
fn inventory_value(items: &[inventory_item::Model]) -> Result<Decimal, ServiceError> {
    items.iter().try_fold(Decimal::ZERO, |total, item| {
        Decimal::from(item.on_hand())
            .checked_mul(item.cost_per_unit)
            .and_then(|value| total.checked_add(value))
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "inventory value overflowed at item {}",
                    item.id
                ))
            })
    })
}

/// Sums `out` quantities per product, largest first, ties by product id.
fn rank_movers(movements: &[inventory_movement::Model], limit: usize) -> Vec<TopMover> {
    let mut totals: BTreeMap<Uuid, i64> = BTreeMap::new();
    for movement in movements {
        *totals.entry(movement.product_id).or_default() += i64::from(movement.quantity);
    }

    let mut movers: Vec<TopMover> = totals
        .into_iter()
        .map(|(product_id, quantity_out)| TopMover {
            product_id,
            quantity_out,
        })
        .collect();
    movers.sort_by(|a, b| {
        b.quantity_out
            .cmp(&a.quantity_out)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    movers.truncate(limit);
    movers
}
