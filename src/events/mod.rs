use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Handle used by services to publish domain events.
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
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Ledger events
    StockInbound {
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        reference_doc: Option<String>,
    },
    StockOutbound {
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        reference_doc: Option<String>,
    },
    InventoryAdjusted {
        product_id: Uuid,
        warehouse_id: Uuid,
        delta_qty: i32,
        new_on_hand: i32,
        reason: String,
    },
    InventoryReserved {
        product_id: Uuid,
        warehouse_id: Uuid,
        requested_qty: i32,
        reserved_qty: i32,
    },
    InventoryReleased {
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
    },

    // Sales order events
    OrderReserved {
        order_id: Uuid,
        partial: bool,
    },
    PartialReservationWarning {
        order_id: Uuid,
        product_id: Uuid,
        requested_qty: i32,
        reserved_qty: i32,
    },
    OrderCancelled {
        order_id: Uuid,
        stock_freed: i32,
    },
    OrderShipped(Uuid),
    OrderDelivered(Uuid),

    // Purchase order events
    PurchaseOrderApproved(Uuid),
    PurchaseOrderReceived {
        purchase_order_id: Uuid,
        total_received: i32,
    },
    PurchaseOrderCancelled(Uuid),

    // Shipment events
    ShipmentCreated(Uuid),
    ShipmentStatusChanged {
        shipment_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ShipmentDelivered(Uuid),
}

/// Drains the event channel, logging each event. Spawn this once per
/// process; it exits when every sender is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(event = ?event, "Processing domain event");
    }
}
