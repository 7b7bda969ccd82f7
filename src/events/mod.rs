use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::stock_alert::{AlertSeverity, AlertType};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Enqueues an event without waiting for channel capacity. Events are
    /// published after the owning transaction commits, so a full or closed
    /// channel is logged and otherwise ignored.
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "Dropping stock ledger event");
            metrics::counter!("stock_ledger.events.dropped", 1);
        }
    }
}

/// Domain events emitted after a stock mutation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StockReceived {
        product_id: Uuid,
        inventory_item_id: Uuid,
        quantity: i32,
        created_item: bool,
    },
    StockAdjusted {
        product_id: Uuid,
        delta: i32,
        reason: String,
    },
    InventoryReserved {
        product_id: Uuid,
        reserved_for: String,
        quantity: i32,
        expires_at: DateTime<Utc>,
    },
    ReservationReleased {
        product_id: Uuid,
        reserved_for: String,
        quantity: i32,
        expired: bool,
    },
    ReservationFulfilled {
        product_id: Uuid,
        order_id: String,
        quantity: i32,
    },
    StockAlertRaised {
        alert_id: Uuid,
        product_id: Uuid,
        alert_type: AlertType,
        severity: AlertSeverity,
    },
}

impl Event {
    pub fn product_id(&self) -> Uuid {
        match self {
            Event::StockReceived { product_id, .. }
            | Event::StockAdjusted { product_id, .. }
            | Event::InventoryReserved { product_id, .. }
            | Event::ReservationReleased { product_id, .. }
            | Event::ReservationFulfilled { product_id, .. }
            | Event::StockAlertRaised { product_id, .. } => *product_id,
        }
    }
}

// Handlers implementing this trait receive every event drained from the channel.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Box<dyn EventHandler>>) {
    info!("Event processing loop started");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockAlertRaised {
                product_id,
                alert_type,
                severity,
                ..
            } => {
                warn!(
                    product_id = %product_id,
                    alert_type = alert_type.as_str(),
                    severity = ?severity,
                    "Stock alert raised"
                );
            }
            other => {
                info!(product_id = %other.product_id(), event = ?other, "Stock ledger event");
            }
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                warn!(error = %e, "Event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}
