//! StateSet Stock Ledger
//!
//! Inventory reservation and stock ledger engine: per-product stock
//! counters, time-bounded reservations, fulfillment into sales, an
//! append-only movement ledger and threshold-based stock alerts.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

pub use errors::ServiceError;
pub use services::InventoryEngine;
