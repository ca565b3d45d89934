//! Persistence models for the fulfillment core.
//!
//! Aggregates own their lines as separate row sets keyed by the parent id;
//! cross-references are ids resolved through lookups, never embedded object
//! graphs.

pub mod customer;
pub mod inventory;
pub mod inventory_movement;
pub mod product;
pub mod purchase_order;
pub mod purchase_order_line;
pub mod sales_order;
pub mod sales_order_line;
pub mod shipment;
pub mod supplier;
pub mod warehouse;
