//! # fulfillment-core
//!
//! Backend core for a warehouse/order-fulfillment system: per-product,
//! per-warehouse stock tracking with an append-only movement log,
//! sales-order reservation with backorders, order cancellation,
//! purchase-order receiving, and the shipment lifecycle from planning to
//! delivery.
//!
//! The crate exposes plain service objects over a sea-orm connection;
//! transport layers (HTTP, gRPC, queues) live with the caller. Each
//! service operation runs in a single transaction, reports failures
//! through [`errors::ServiceError`], and publishes domain events through
//! [`events::EventSender`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! use fulfillment_core::{config, db, events, logging, services};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = config::load_config()?;
//!     logging::init_tracing(&(&cfg).into());
//!
//!     let pool = Arc::new(db::establish_connection_from_app_config(&cfg).await?);
//!     if cfg.auto_migrate {
//!         db::run_migrations(&pool).await?;
//!     }
//!
//!     let (tx, rx) = mpsc::channel(256);
//!     tokio::spawn(events::process_events(rx));
//!     let sender = Arc::new(events::EventSender::new(tx));
//!
//!     let _reservations =
//!         services::order_reservation::OrderReservationService::new(pool.clone(), sender.clone());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

pub use config::AppConfig;
pub use errors::ServiceError;
pub use events::{Event, EventSender};
