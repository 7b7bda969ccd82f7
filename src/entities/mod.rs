//! sea-orm entities backing the stock ledger.
//!
//! Four tables: `inventory_items` (authoritative counters),
//! `inventory_reservations` (live holds), `inventory_movements`
//! (append-only ledger) and `stock_alerts`.

pub mod inventory_item;
pub mod inventory_movement;
pub mod inventory_reservation;
pub mod stock_alert;

pub use inventory_item::Entity as InventoryItem;
pub use inventory_movement::Entity as InventoryMovement;
pub use inventory_reservation::Entity as InventoryReservation;
pub use stock_alert::Entity as StockAlert;
