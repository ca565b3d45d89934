//! Service layer: one service per fulfillment engine. Services share the
//! ledger primitives in [`inventory::ledger`] and the aggregates' persisted
//! state; they never call each other.

pub mod inventory;
pub mod order_cancellation;
pub mod order_reservation;
pub mod purchase_receiving;
pub mod shipments;
