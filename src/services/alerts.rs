//! AlertEvaluator: low-stock, out-of-stock and expiry alerts.
//!
//! Rules run on the product aggregate after every committed mutation. An
//! alert is only inserted when no unacknowledged alert of the same
//! (product, type) exists; a unique partial index backs that rule.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::entities::inventory_item;
use crate::entities::stock_alert::{self, AlertSeverity, AlertType, Entity as StockAlertEntity};
use crate::errors::{is_unique_violation, ServiceError};
use crate::services::stock_ledger::{items_for_product, reorder_point, StockLevel};

/// An alert condition found by the rules, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCondition {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
}

/// Stock-level rules shared with the analytics rollup.
pub fn stock_alert_types(available: i64, reorder_point: i64) -> Vec<AlertType> {
    let mut types = Vec::new();
    if available <= reorder_point && available > 0 {
        types.push(AlertType::LowStock);
    }
    if available <= 0 {
        types.push(AlertType::OutOfStock);
    }
    types
}

/// Evaluates every rule against a product's rows.
pub fn conditions(
    items: &[inventory_item::Model],
    now: DateTime<Utc>,
    expiring_soon_days: i64,
) -> Vec<AlertCondition> {
    if items.is_empty() {
        return Vec::new();
    }

    let level = StockLevel::from_items(items);
    let reorder = reorder_point(items);
    let mut found: Vec<AlertCondition> = stock_alert_types(level.available, reorder)
        .into_iter()
        .map(|alert_type| match alert_type {
            AlertType::LowStock => AlertCondition {
                alert_type,
                severity: AlertSeverity::Medium,
                message: format!(
                    "Low stock: {} available, reorder point {}",
                    level.available, reorder
                ),
            },
            _ => AlertCondition {
                alert_type,
                severity: AlertSeverity::High,
                message: format!("Out of stock: {} reserved, none available", level.reserved),
            },
        })
        .collect();

    let days: Vec<(i64, &inventory_item::Model)> = items
        .iter()
        .filter(|item| item.on_hand() > 0)
        .filter_map(|item| item.days_until_expiration(now).map(|d| (d, item)))
        .collect();

    let expired: Vec<_> = days.iter().filter(|(d, _)| *d <= 0).collect();
    if !expired.is_empty() {
        let units: i64 = expired.iter().map(|(_, i)| i.on_hand()).sum();
        found.push(AlertCondition {
            alert_type: AlertType::Expired,
            severity: AlertSeverity::Critical,
            message: format!("{} units in {} expired batch(es)", units, expired.len()),
        });
    }

    if let Some((soonest, item)) = days
        .iter()
        .filter(|(d, _)| *d > 0 && *d <= expiring_soon_days)
        .min_by_key(|(d, _)| *d)
    {
        found.push(AlertCondition {
            alert_type: AlertType::ExpiringSoon,
            severity: AlertSeverity::Medium,
            message: format!(
                "Batch {} expires in {} day(s)",
                item.batch_number.as_deref().unwrap_or(item.sku.as_str()),
                soonest
            ),
        });
    }

    found
}

#[derive(Clone)]
pub struct AlertEvaluator {
    db_pool: Arc<DatabaseConnection>,
    expiring_soon_days: i64,
}

impl AlertEvaluator {
    pub fn new(db_pool: Arc<DatabaseConnection>, expiring_soon_days: i64) -> Self {
        Self {
            db_pool,
            expiring_soon_days,
        }
    }

    /// Raises the alerts the product currently warrants and returns the
    /// rows that were newly inserted.
    pub async fn evaluate(&self, product_id: Uuid) -> Result<Vec<stock_alert::Model>, ServiceError> {
        self.evaluate_at(product_id, Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn evaluate_at(
        &self,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<stock_alert::Model>, ServiceError> {
        let db = &*self.db_pool;
        let items = items_for_product(db, product_id).await?;

        let mut raised = Vec::new();
        for condition in conditions(&items, now, self.expiring_soon_days) {
            let open = StockAlertEntity::find()
                .filter(stock_alert::Column::ProductId.eq(product_id))
                .filter(stock_alert::Column::AlertType.eq(condition.alert_type))
                .filter(stock_alert::Column::Acknowledged.eq(false))
                .count(db)
                .await
                .map_err(ServiceError::db_error)?;
            if open > 0 {
                debug!(
                    alert_type = condition.alert_type.as_str(),
                    "Open alert already exists"
                );
                continue;
            }

            let inserted = stock_alert::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                alert_type: Set(condition.alert_type),
                message: Set(condition.message),
                severity: Set(condition.severity),
                acknowledged: Set(false),
                created_at: Set(now),
            }
            .insert(db)
            .await;

            // idx_stock_alerts_open rejects a second open alert raised by a
            // concurrent evaluation between the count and the insert.
            let alert = match inserted {
                Ok(alert) => alert,
                Err(err) if is_unique_violation(&err) => {
                    debug!(
                        alert_type = condition.alert_type.as_str(),
                        "Open alert raised concurrently"
                    );
                    continue;
                }
                Err(err) => return Err(ServiceError::db_error(err)),
            };

            counter!("stock_ledger.alerts.raised", 1, "type" => condition.alert_type.as_str());
            info!(
                alert_id = %alert.id,
                alert_type = alert.alert_type.as_str(),
                "Raised stock alert"
            );
            raised.push(alert);
        }

        Ok(raised)
    }

    /// Alerts with the given acknowledgement state, newest first.
    pub async fn list_alerts(
        &self,
        acknowledged: bool,
    ) -> Result<Vec<stock_alert::Model>, ServiceError> {
        StockAlertEntity::find()
            .filter(stock_alert::Column::Acknowledged.eq(acknowledged))
            .order_by_desc(stock_alert::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}
