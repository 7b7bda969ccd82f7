//! StockLedger: authoritative per-row counters (`available`, `reserved`,
//! `sold`) and the receive/adjust operations.
//!
//! Counters only change through [`apply_counter_change`], a single guarded
//! `UPDATE` whose affected-row count tells the caller whether the guard held.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::InventorySettings;
use crate::entities::inventory_item::{self, fifo_order, Entity as InventoryItemEntity};
use crate::entities::inventory_reservation::{self, Entity as InventoryReservationEntity};
use crate::entities::inventory_movement::MovementType;
use crate::errors::{is_unique_violation, ServiceError};
use crate::services::movements::{LedgerTotals, MovementRecorder, NewMovement};

const DEFAULT_LOCATION: &str = "default";

/// Exclusive upper bound for `cost_per_unit`; the column holds 12 integer digits.
pub const COST_PER_UNIT_LIMIT: i64 = 1_000_000_000_000;

/// Aggregated counters for one product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub available: i64,
    pub reserved: i64,
    pub sold: i64,
    /// `available + reserved`: unsold stock on hand.
    pub total: i64,
}

impl StockLevel {
    pub fn from_items(items: &[inventory_item::Model]) -> Self {
        let (available, reserved, sold) = items.iter().fold((0i64, 0i64, 0i64), |acc, item| {
            (
                acc.0 + i64::from(item.available),
                acc.1 + i64::from(item.reserved),
                acc.2 + i64::from(item.sold),
            )
        });
        Self {
            available,
            reserved,
            sold,
            total: available + reserved,
        }
    }
}

/// Largest reorder point among a product's rows; zero without rows.
pub fn reorder_point(items: &[inventory_item::Model]) -> i64 {
    items
        .iter()
        .map(|item| i64::from(item.reorder_point))
        .max()
        .unwrap_or(0)
}

/// A single guarded counter mutation on one inventory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterChange {
    /// `available += n`
    Credit(i32),
    /// `available -= n` where `available >= n`
    Debit(i32),
    /// `available -= n, reserved += n` where `available >= n`
    Reserve(i32),
    /// `reserved -= n, available += n` where `reserved >= n`
    Unreserve(i32),
    /// `reserved -= n, sold += n` where `reserved >= n`
    Sell(i32),
}

impl CounterChange {
    fn deltas(self) -> Vec<(inventory_item::Column, i32)> {
        use inventory_item::Column::{Available, Reserved, Sold};
        match self {
            CounterChange::Credit(n) => vec![(Available, n)],
            CounterChange::Debit(n) => vec![(Available, -n)],
            CounterChange::Reserve(n) => vec![(Available, -n), (Reserved, n)],
            CounterChange::Unreserve(n) => vec![(Reserved, -n), (Available, n)],
            CounterChange::Sell(n) => vec![(Reserved, -n), (Sold, n)],
        }
    }

    fn guard(self) -> Option<(inventory_item::Column, i32)> {
        use inventory_item::Column::{Available, Reserved};
        match self {
            CounterChange::Credit(_) => None,
            CounterChange::Debit(n) | CounterChange::Reserve(n) => Some((Available, n)),
            CounterChange::Unreserve(n) | CounterChange::Sell(n) => Some((Reserved, n)),
        }
    }

    /// Upper bound keeping the incremented counter within `i32`.
    fn ceiling(self) -> Option<(inventory_item::Column, i32)> {
        use inventory_item::Column::{Available, Reserved, Sold};
        match self {
            CounterChange::Credit(n) | CounterChange::Unreserve(n) => {
                Some((Available, i32::MAX - n))
            }
            CounterChange::Reserve(n) => Some((Reserved, i32::MAX - n)),
            CounterChange::Sell(n) => Some((Sold, i32::MAX - n)),
            CounterChange::Debit(_) => None,
        }
    }

    fn quantity(self) -> i32 {
        match self {
            CounterChange::Credit(n)
            | CounterChange::Debit(n)
            | CounterChange::Reserve(n)
            | CounterChange::Unreserve(n)
            | CounterChange::Sell(n) => n,
        }
    }
}

/// Issues one `UPDATE inventory_items SET .. WHERE id = ? [AND guard >= n]
/// [AND target <= i32::MAX - n]`. Returns `false` when a guard rejected the
/// change (or the row is gone).
pub async fn apply_counter_change<C>(
    conn: &C,
    item_id: Uuid,
    change: CounterChange,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    ServiceError::ensure_positive("quantity", change.quantity())?;

    let mut update = InventoryItemEntity::update_many()
        .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_item::Column::Id.eq(item_id));

    for (column, delta) in change.deltas() {
        update = update.col_expr(column, Expr::col(column).add(delta));
    }
    if let Some((column, minimum)) = change.guard() {
        update = update.filter(column.gte(minimum));
    }
    if let Some((column, maximum)) = change.ceiling() {
        update = update.filter(column.lte(maximum));
    }

    let result = update.exec(conn).await.map_err(ServiceError::db_error)?;
    Ok(result.rows_affected == 1)
}

async fn find_by_sku<C>(conn: &C, sku: &str) -> Result<Option<inventory_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    InventoryItemEntity::find()
        .filter(inventory_item::Column::Sku.eq(sku))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Adds a receipt to an existing row and records its latest unit cost.
async fn credit_receipt<C>(
    conn: &C,
    item: &inventory_item::Model,
    request: &ReceiveStock,
) -> Result<Uuid, ServiceError>
where
    C: ConnectionTrait,
{
    if item.product_id != request.product_id {
        return Err(ServiceError::ValidationError(format!(
            "sku {} belongs to product {}",
            request.sku, item.product_id
        )));
    }
    if !apply_counter_change(conn, item.id, CounterChange::Credit(request.quantity)).await? {
        return Err(overflow(item, request.quantity));
    }

    InventoryItemEntity::update_many()
        .col_expr(
            inventory_item::Column::CostPerUnit,
            Expr::value(request.cost_per_unit),
        )
        .filter(inventory_item::Column::Id.eq(item.id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(item.id)
}

fn overflow(item: &inventory_item::Model, quantity: i32) -> ServiceError {
    ServiceError::InvalidQuantity(format!(
        "adding {} units to inventory item {} exceeds the counter limit",
        quantity, item.id
    ))
}

/// All rows of a product in allocation order.
pub async fn items_for_product<C>(
    conn: &C,
    product_id: Uuid,
) -> Result<Vec<inventory_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut items = InventoryItemEntity::find()
        .filter(inventory_item::Column::ProductId.eq(product_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    items.sort_by(fifo_order);
    Ok(items)
}

/// Input for [`StockLedger::receive`].
#[derive(Debug, Clone)]
pub struct ReceiveStock {
    pub product_id: Uuid,
    pub sku: String,
    pub quantity: i32,
    pub cost_per_unit: Decimal,
    pub reason: String,
    pub actor: String,
    pub batch_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub reorder_point: Option<i32>,
    pub reorder_quantity: Option<i32>,
}

impl ReceiveStock {
    pub fn new(
        product_id: Uuid,
        sku: impl Into<String>,
        quantity: i32,
        cost_per_unit: Decimal,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            sku: sku.into(),
            quantity,
            cost_per_unit,
            reason: reason.into(),
            actor: actor.into(),
            batch_number: None,
            expiration_date: None,
            location: None,
            reorder_point: None,
            reorder_quantity: None,
        }
    }

    pub fn batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    pub fn expires(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }

    pub fn reorder(mut self, reorder_point: i32, reorder_quantity: i32) -> Self {
        self.reorder_point = Some(reorder_point);
        self.reorder_quantity = Some(reorder_quantity);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveOutcome {
    pub inventory_item_id: Uuid,
    pub created_item: bool,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustOutcome {
    pub delta: i32,
    /// Rows touched and the signed change applied to each.
    pub rows: Vec<(Uuid, i32)>,
}

/// Counter state compared with the ledger and live reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub product_id: Uuid,
    pub counters: StockLevel,
    pub ledger: LedgerTotals,
    pub live_reserved: i64,
    pub ledger_matches: bool,
    pub reservations_match: bool,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.ledger_matches && self.reservations_match
    }
}

/// Owns the counters; every mutation appends its movement on the same transaction.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    recorder: MovementRecorder,
    settings: InventorySettings,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>, settings: InventorySettings) -> Self {
        Self {
            db,
            recorder: MovementRecorder::new(),
            settings,
        }
    }

    /// Aggregate counters across the product's rows; zeros when it has none.
    #[instrument(skip(self))]
    pub async fn get_stock(&self, product_id: Uuid) -> Result<StockLevel, ServiceError> {
        let items = items_for_product(&*self.db, product_id).await?;
        Ok(StockLevel::from_items(&items))
    }

    /// Rows of a product in allocation order.
    pub async fn items(&self, product_id: Uuid) -> Result<Vec<inventory_item::Model>, ServiceError> {
        items_for_product(&*self.db, product_id).await
    }

    /// Adds stock to the (product, sku) row, creating it when missing.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, sku = %request.sku, quantity = request.quantity))]
    pub async fn receive(&self, request: ReceiveStock) -> Result<ReceiveOutcome, ServiceError> {
        ServiceError::ensure_positive("quantity", request.quantity)?;
        if request.sku.trim().is_empty() {
            return Err(ServiceError::ValidationError("sku must not be empty".into()));
        }
        if request.cost_per_unit.is_sign_negative()
            || request.cost_per_unit >= Decimal::from(COST_PER_UNIT_LIMIT)
        {
            return Err(ServiceError::ValidationError(format!(
                "cost_per_unit must be at least 0 and below {}, got {}",
                COST_PER_UNIT_LIMIT, request.cost_per_unit
            )));
        }

        let start = std::time::Instant::now();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let (item_id, created_item) = match find_by_sku(&txn, &request.sku).await? {
            Some(item) => (credit_receipt(&txn, &item, &request).await?, false),
            None => {
                // A concurrent receipt may create the same SKU first; the
                // savepoint keeps the outer transaction usable after the
                // unique violation.
                let savepoint = txn.begin().await.map_err(ServiceError::db_error)?;
                match self.new_item(&request).insert(&savepoint).await {
                    Ok(item) => {
                        savepoint.commit().await.map_err(ServiceError::db_error)?;
                        (item.id, true)
                    }
                    Err(err) if is_unique_violation(&err) => {
                        savepoint.rollback().await.map_err(ServiceError::db_error)?;
                        counter!("stock_ledger.receive.sku_conflicts", 1);
                        info!("SKU created concurrently, crediting existing row");
                        let item = find_by_sku(&txn, &request.sku).await?.ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "sku {} conflicted but is not visible",
                                request.sku
                            ))
                        })?;
                        (credit_receipt(&txn, &item, &request).await?, false)
                    }
                    Err(err) => return Err(ServiceError::db_error(err)),
                }
            }
        };

        self.recorder
            .append(
                &txn,
                NewMovement::new(
                    request.product_id,
                    item_id,
                    MovementType::In,
                    request.quantity,
                    request.reason.clone(),
                    request.actor.clone(),
                )
                .with_cost(request.cost_per_unit),
            )
            .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        histogram!("stock_ledger.receive.duration", start.elapsed());
        counter!("stock_ledger.receive.units", request.quantity as u64);
        info!(
            inventory_item_id = %item_id,
            created_item,
            "Received stock"
        );

        Ok(ReceiveOutcome {
            inventory_item_id: item_id,
            created_item,
            quantity: request.quantity,
        })
    }

    fn new_item(&self, request: &ReceiveStock) -> inventory_item::ActiveModel {
        inventory_item::ActiveModel {
            product_id: Set(request.product_id),
            sku: Set(request.sku.clone()),
            available: Set(request.quantity),
            reserved: Set(0),
            sold: Set(0),
            reorder_point: Set(request
                .reorder_point
                .unwrap_or(self.settings.default_reorder_point)),
            reorder_quantity: Set(request
                .reorder_quantity
                .unwrap_or(self.settings.default_reorder_quantity)),
            cost_per_unit: Set(request.cost_per_unit),
            location: Set(request
                .location
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string())),
            batch_number: Set(request.batch_number.clone()),
            expiration_date: Set(request.expiration_date),
            ..Default::default()
        }
    }

    /// Applies a signed delta to the product's `available` stock.
    ///
    /// Negative deltas consume rows in allocation order and either succeed
    /// completely or fail with `InsufficientStock`; positive deltas credit
    /// the first row.
    #[instrument(skip(self, reason, actor))]
    pub async fn adjust(
        &self,
        product_id: Uuid,
        delta: i32,
        reason: &str,
        actor: &str,
    ) -> Result<AdjustOutcome, ServiceError> {
        if delta == 0 {
            return Err(ServiceError::InvalidQuantity(
                "adjustment delta must not be zero".into(),
            ));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let items = items_for_product(&txn, product_id).await?;

        let mut rows = Vec::new();
        if delta > 0 {
            let item = items.first().ok_or_else(|| {
                ServiceError::NotFound(format!("no inventory rows for product {}", product_id))
            })?;
            if !apply_counter_change(&txn, item.id, CounterChange::Credit(delta)).await? {
                return Err(overflow(item, delta));
            }
            self.recorder
                .append(
                    &txn,
                    NewMovement::adjustment(product_id, item.id, delta, reason, actor),
                )
                .await?;
            rows.push((item.id, delta));
        } else {
            let needed = delta.unsigned_abs() as i64;
            let available = StockLevel::from_items(&items).available;
            if available < needed {
                counter!("stock_ledger.adjust.insufficient", 1);
                warn!(available, requested = needed, "Adjustment would drive stock negative");
                return Err(ServiceError::InsufficientStock(format!(
                    "product {} has {} available, adjustment requires {}",
                    product_id, available, needed
                )));
            }

            let mut remaining = needed as i32;
            for item in &items {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(item.available);
                if take == 0 {
                    continue;
                }
                if !apply_counter_change(&txn, item.id, CounterChange::Debit(take)).await? {
                    counter!("stock_ledger.adjust.insufficient", 1);
                    return Err(ServiceError::InsufficientStock(format!(
                        "inventory item {} changed concurrently",
                        item.id
                    )));
                }
                self.recorder
                    .append(
                        &txn,
                        NewMovement::adjustment(product_id, item.id, -take, reason, actor),
                    )
                    .await?;
                rows.push((item.id, -take));
                remaining -= take;
            }
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stock_ledger.adjust.success", 1);
        info!(delta, rows = rows.len(), "Adjusted stock");

        Ok(AdjustOutcome { delta, rows })
    }

    /// Compares the summed counters with a replay of the ledger and with the
    /// live reservation total.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, product_id: Uuid) -> Result<ReconciliationReport, ServiceError> {
        let db = &*self.db;
        let counters = StockLevel::from_items(&items_for_product(db, product_id).await?);
        let ledger = self.recorder.replay(db, product_id).await?;
        let live_reserved: i64 = InventoryReservationEntity::find()
            .filter(inventory_reservation::Column::ProductId.eq(product_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .iter()
            .map(|r| i64::from(r.quantity))
            .sum();

        let ledger_matches = ledger.available == counters.available
            && ledger.reserved == counters.reserved
            && ledger.sold == counters.sold;
        let reservations_match = live_reserved == counters.reserved;

        if !ledger_matches || !reservations_match {
            warn!(
                ?counters,
                ?ledger,
                live_reserved,
                "Stock counters drifted from ledger"
            );
            counter!("stock_ledger.reconcile.drift", 1);
        }

        Ok(ReconciliationReport {
            product_id,
            counters,
            ledger,
            live_reserved,
            ledger_matches,
            reservations_match,
        })
    }
}
