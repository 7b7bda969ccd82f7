//! ExpirySweeper: releases reservations past `expires_at`.
//!
//! [`ExpirySweeper::sweep_at`] runs one deterministic pass; [`ExpirySweeper::start`]
//! drives it from a tokio interval until the returned handle is stopped.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::alerts::AlertEvaluator;
use crate::services::reservations::ReservationManager;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired reservation rows found.
    pub examined: usize,
    pub released: usize,
    /// Rows already released elsewhere or whose release failed.
    pub skipped: usize,
    pub products_evaluated: usize,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    reservations: ReservationManager,
    alerts: AlertEvaluator,
    events: Option<EventSender>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(reservations: ReservationManager, alerts: AlertEvaluator, interval: Duration) -> Self {
        Self {
            reservations,
            alerts,
            events: None,
            interval,
        }
    }

    pub fn with_event_sender(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    pub async fn sweep(&self) -> Result<SweepReport, ServiceError> {
        self.sweep_at(Utc::now()).await
    }

    /// Releases every reservation with `expires_at < now`, then evaluates
    /// alerts for each product it touched. Individual failures are logged
    /// and counted as skipped; only failing to list expired rows is an error.
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let start = std::time::Instant::now();
        let expired = self.reservations.list_expired(now).await?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..Default::default()
        };
        let mut touched: BTreeSet<Uuid> = BTreeSet::new();

        for reservation in &expired {
            match self
                .reservations
                .release(
                    reservation.product_id,
                    &reservation.reserved_for,
                    Some(reservation.quantity),
                )
                .await
            {
                Ok(outcome) => {
                    report.released += 1;
                    touched.insert(reservation.product_id);
                    if let Some(events) = &self.events {
                        events.publish(Event::ReservationReleased {
                            product_id: outcome.product_id,
                            reserved_for: outcome.reserved_for,
                            quantity: outcome.released_quantity,
                            expired: true,
                        });
                    }
                }
                Err(e) if e.is_soft() => {
                    report.skipped += 1;
                    debug!(reservation_id = %reservation.id, "Expired reservation already released");
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!(
                        reservation_id = %reservation.id,
                        product_id = %reservation.product_id,
                        error = %e,
                        "Failed to release expired reservation"
                    );
                }
            }
        }

        for product_id in touched {
            match self.alerts.evaluate(product_id).await {
                Ok(raised) => {
                    report.products_evaluated += 1;
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
                    warn!(product_id = %product_id, error = %e, "Alert evaluation failed after sweep");
                }
            }
        }

        counter!("stock_ledger.sweep.released", report.released as u64);
        counter!("stock_ledger.sweep.skipped", report.skipped as u64);
        histogram!("stock_ledger.sweep.duration", start.elapsed());
        if report.examined > 0 {
            info!(
                examined = report.examined,
                released = report.released,
                skipped = report.skipped,
                "Expiry sweep completed"
            );
        }

        Ok(report)
    }

    /// Spawns the periodic sweep on the current tokio runtime.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Expiry sweeper started");

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        if let Err(e) = self.sweep().await {
                            error!(error = %e, "Expiry sweep failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Owner of a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the task to stop and waits for the in-flight sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Expiry sweeper task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
