// Ledger core
pub mod movements;
pub mod stock_ledger;

// Holds and sales
pub mod fulfillment;
pub mod reservations;

// Follow-up processing
pub mod alerts;
pub mod analytics;
pub mod expiry_sweeper;

use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::InventorySettings;
use crate::entities::{inventory_reservation, stock_alert};
use crate::entities::inventory_reservation::ReservationType;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

use self::alerts::AlertEvaluator;
use self::analytics::{AnalyticsService, AnalyticsSummary};
use self::expiry_sweeper::ExpirySweeper;
use self::fulfillment::{FulfillmentCoordinator, FulfillmentOutcome};
use self::reservations::{ReleaseOutcome, ReservationManager, ReserveStock};
use self::stock_ledger::{
    AdjustOutcome, ReceiveOutcome, ReceiveStock, ReconciliationReport, StockLedger, StockLevel,
};

/// Entry point for collaborators: wires the ledger components together and
/// runs alert evaluation and event publication after each committed mutation.
#[derive(Clone)]
pub struct InventoryEngine {
    db: Arc<DatabaseConnection>,
    settings: InventorySettings,
    ledger: StockLedger,
    reservations: ReservationManager,
    fulfillment: FulfillmentCoordinator,
    alerts: AlertEvaluator,
    analytics: AnalyticsService,
    events: Option<EventSender>,
}

impl InventoryEngine {
    pub fn new(db: Arc<DatabaseConnection>, settings: InventorySettings) -> Self {
        Self {
            ledger: StockLedger::new(db.clone(), settings.clone()),
            reservations: ReservationManager::new(db.clone()),
            fulfillment: FulfillmentCoordinator::new(db.clone()),
            alerts: AlertEvaluator::new(db.clone(), settings.expiring_soon_days),
            analytics: AnalyticsService::new(
                db.clone(),
                settings.analytics_window_days,
                settings.analytics_top_moving_limit as usize,
            ),
            events: None,
            db,
            settings,
        }
    }

    pub fn with_event_sender(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn settings(&self) -> &InventorySettings {
        &self.settings
    }

    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    pub fn alerts(&self) -> &AlertEvaluator {
        &self.alerts
    }

    /// A sweeper bound to this engine's components, not yet started.
    pub fn expiry_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.reservations.clone(),
            self.alerts.clone(),
            self.settings.sweep_interval(),
        )
        .with_event_sender(self.events.clone())
    }

    pub async fn get_stock(&self, product_id: Uuid) -> Result<StockLevel, ServiceError> {
        self.ledger.get_stock(product_id).await
    }

    pub async fn receive(&self, request: ReceiveStock) -> Result<ReceiveOutcome, ServiceError> {
        let product_id = request.product_id;
        let outcome = self.ledger.receive(request).await?;
        self.after_commit(
            product_id,
            Event::StockReceived {
                product_id,
                inventory_item_id: outcome.inventory_item_id,
                quantity: outcome.quantity,
                created_item: outcome.created_item,
            },
        )
        .await;
        Ok(outcome)
    }

    /// Convenience form of [`InventoryEngine::receive`] with positional arguments.
    #[allow(clippy::too_many_arguments)]
    pub async fn receive_stock(
        &self,
        product_id: Uuid,
        sku: &str,
        quantity: i32,
        cost_per_unit: Decimal,
        reason: &str,
        actor: &str,
        batch_number: Option<String>,
        expiration_date: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<ReceiveOutcome, ServiceError> {
        let mut request = ReceiveStock::new(product_id, sku, quantity, cost_per_unit, reason, actor);
        request.batch_number = batch_number;
        request.expiration_date = expiration_date;
        self.receive(request).await
    }

    pub async fn adjust(
        &self,
        product_id: Uuid,
        delta: i32,
        reason: &str,
        actor: &str,
    ) -> Result<AdjustOutcome, ServiceError> {
        let outcome = self.ledger.adjust(product_id, delta, reason, actor).await?;
        self.after_commit(
            product_id,
            Event::StockAdjusted {
                product_id,
                delta,
                reason: reason.to_string(),
            },
        )
        .await;
        Ok(outcome)
    }

    pub async fn reserve(
        &self,
        product_id: Uuid,
        quantity: i32,
        reserved_for: &str,
        reservation_type: ReservationType,
        ttl_seconds: i64,
    ) -> Result<Vec<inventory_reservation::Model>, ServiceError> {
        let created = self
            .reservations
            .reserve(ReserveStock::new(
                product_id,
                quantity,
                reserved_for,
                reservation_type,
                ttl_seconds,
            ))
            .await?;
        if let Some(first) = created.first() {
            self.after_commit(
                product_id,
                Event::InventoryReserved {
                    product_id,
                    reserved_for: reserved_for.to_string(),
                    quantity,
                    expires_at: first.expires_at,
                },
            )
            .await;
        }
        Ok(created)
    }

    pub async fn release(
        &self,
        product_id: Uuid,
        reserved_for: &str,
        quantity: Option<i32>,
    ) -> Result<ReleaseOutcome, ServiceError> {
        let outcome = self
            .reservations
            .release(product_id, reserved_for, quantity)
            .await?;
        self.after_commit(
            product_id,
            Event::ReservationReleased {
                product_id,
                reserved_for: outcome.reserved_for.clone(),
                quantity: outcome.released_quantity,
                expired: false,
            },
        )
        .await;
        Ok(outcome)
    }

    pub async fn fulfill(
        &self,
        product_id: Uuid,
        quantity: i32,
        order_id: &str,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let outcome = self
            .fulfillment
            .fulfill(product_id, quantity, order_id)
            .await?;
        self.after_commit(
            product_id,
            Event::ReservationFulfilled {
                product_id,
                order_id: order_id.to_string(),
                quantity,
            },
        )
        .await;
        Ok(outcome)
    }

    pub async fn list_live(
        &self,
        product_id: Option<Uuid>,
    ) -> Result<Vec<inventory_reservation::Model>, ServiceError> {
        self.reservations.list_live(product_id).await
    }

    pub async fn list_alerts(
        &self,
        acknowledged: bool,
    ) -> Result<Vec<stock_alert::Model>, ServiceError> {
        self.alerts.list_alerts(acknowledged).await
    }

    pub async fn get_analytics_summary(&self) -> Result<AnalyticsSummary, ServiceError> {
        self.analytics.summary().await
    }

    pub async fn reconcile(&self, product_id: Uuid) -> Result<ReconciliationReport, ServiceError> {
        self.ledger.reconcile(product_id).await
    }

    /// Publishes the mutation's event and evaluates alerts. Neither step can
    /// fail the already-committed mutation.
    async fn after_commit(&self, product_id: Uuid, event: Event) {
        if let Some(events) = &self.events {
            events.publish(event);
        }

        match self.alerts.evaluate(product_id).await {
            Ok(raised) => {
                if let Some(events) = &self.events {
                    for alert in raised {
                        events.publish(Event::StockAlertRaised {
                            alert_id: alert.id,
                            product_id,
                            alert_type: alert.alert_type,
                            severity: alert.severity,
                        });
                    }
                }
            }
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "Alert evaluation failed");
                metrics::counter!("stock_ledger.alerts.evaluation_failed", 1);
            }
        }
    }
}
