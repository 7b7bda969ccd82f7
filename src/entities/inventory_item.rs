use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// One stock row per (product, SKU, batch/location).
///
/// `available` and `reserved` never drop below zero and `sold` only grows;
/// the counters are changed exclusively through guarded `UPDATE` statements
/// issued by the stock ledger.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub available: i32,
    pub reserved: i32,
    pub sold: i32,
    pub reorder_point: i32,
    pub reorder_quantity: i32,
    pub cost_per_unit: Decimal,
    pub location: String,
    pub batch_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }

        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}

impl Model {
    /// Unsold stock physically on hand for this row.
    pub fn on_hand(&self) -> i64 {
        i64::from(self.available) + i64::from(self.reserved)
    }

    /// Whole days until `expiration_date`, rounded up. `None` when the row
    /// does not expire.
    pub fn days_until_expiration(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiration_date.map(|expires| {
            let seconds = (expires - now).num_seconds();
            let day = 86_400;
            if seconds > 0 {
                (seconds + day - 1) / day
            } else {
                seconds.div_euclid(day)
            }
        })
    }
}

/// Allocation order across a product's rows: expiring rows first (earliest
/// expiry first), then non-expiring rows, ties broken by age and SKU.
pub fn fifo_order(a: &Model, b: &Model) -> Ordering {
    match (a.expiration_date, b.expiration_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.created_at.cmp(&b.created_at))
    .then_with(|| a.sku.cmp(&b.sku))
}
