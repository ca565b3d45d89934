#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use fulfillment_core::{
    db::{self, DbConfig, DbPool},
    entities::{
        customer, inventory, inventory_movement, product, purchase_order,
        purchase_order::PurchaseOrderStatus, purchase_order_line, sales_order,
        sales_order::SalesOrderStatus, sales_order_line, shipment, supplier, warehouse,
    },
    events::{self, EventSender},
    services::{
        inventory::InventoryService, order_cancellation::OrderCancellationService,
        order_reservation::OrderReservationService, purchase_receiving::PurchaseReceivingService,
        shipments::ShipmentService,
    },
};

pub const TEST_CUTOFF_HOUR: u32 = 14;

/// Test harness over an in-memory SQLite database with the full schema
/// applied. A single pooled connection keeps every query on the same
/// in-memory database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub event_sender: Arc<EventSender>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };

        let pool = db::establish_connection_with_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (tx, rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(rx));

        Self {
            db: Arc::new(pool),
            event_sender: Arc::new(EventSender::new(tx)),
            _event_task: event_task,
        }
    }

    pub fn inventory_service(&self) -> InventoryService {
        InventoryService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn reservation_service(&self) -> OrderReservationService {
        OrderReservationService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn cancellation_service(&self) -> OrderCancellationService {
        OrderCancellationService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn receiving_service(&self) -> PurchaseReceivingService {
        PurchaseReceivingService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn shipment_service(&self) -> ShipmentService {
        ShipmentService::new(self.db.clone(), self.event_sender.clone(), TEST_CUTOFF_HOUR)
    }

    // Seed helpers

    pub async fn seed_product(&self, sku: &str) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("Product {}", sku)),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed product")
    }

    pub async fn seed_warehouse(&self, code: &str) -> warehouse::Model {
        warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            name: Set(format!("Warehouse {}", code)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed warehouse")
    }

    pub async fn seed_customer(&self) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Test Customer".to_string()),
            email: Set(Some("customer@example.com".to_string())),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed customer")
    }

    pub async fn seed_supplier(&self, warehouse_id: Option<Uuid>) -> supplier::Model {
        supplier::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Test Supplier".to_string()),
            warehouse_id: Set(warehouse_id),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed supplier")
    }

    pub async fn seed_inventory(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty_on_hand: i32,
        qty_reserved: i32,
    ) -> inventory::Model {
        inventory::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            warehouse_id: Set(warehouse_id),
            qty_on_hand: Set(qty_on_hand),
            qty_reserved: Set(qty_reserved),
            version: Set(1),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed inventory")
    }

    pub async fn seed_sales_order(
        &self,
        customer_id: Uuid,
        warehouse_id: Option<Uuid>,
        status: SalesOrderStatus,
    ) -> sales_order::Model {
        let token = Uuid::new_v4().simple().to_string();
        sales_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(format!("SO-{}", &token[..8])),
            customer_id: Set(customer_id),
            warehouse_id: Set(warehouse_id),
            status: Set(status),
            created_at: Set(Utc::now()),
            canceled_at: Set(None),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed sales order")
    }

    pub async fn seed_order_line(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        line_number: i32,
        quantity: i32,
        backorder_qty: i32,
    ) -> sales_order_line::Model {
        sales_order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product_id),
            line_number: Set(line_number),
            quantity: Set(quantity),
            backorder_qty: Set(backorder_qty),
            unit_price: Set(dec!(25.00)),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed sales order line")
    }

    pub async fn seed_purchase_order(
        &self,
        supplier_id: Uuid,
        status: PurchaseOrderStatus,
    ) -> purchase_order::Model {
        let token = Uuid::new_v4().simple().to_string();
        purchase_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            po_number: Set(format!("PO-{}", &token[..8])),
            supplier_id: Set(supplier_id),
            status: Set(status),
            created_at: Set(Utc::now()),
            canceled_at: Set(None),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed purchase order")
    }

    pub async fn seed_po_line(
        &self,
        purchase_order_id: Uuid,
        product_id: Uuid,
        line_number: i32,
        quantity: i32,
    ) -> purchase_order_line::Model {
        purchase_order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            purchase_order_id: Set(purchase_order_id),
            product_id: Set(product_id),
            line_number: Set(line_number),
            quantity: Set(quantity),
            received_qty: Set(0),
            unit_price: Set(dec!(10.00)),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed purchase order line")
    }

    // Reload helpers

    pub async fn get_inventory(&self, product_id: Uuid, warehouse_id: Uuid) -> inventory::Model {
        inventory::Entity::find()
            .filter(inventory::Column::ProductId.eq(product_id))
            .filter(inventory::Column::WarehouseId.eq(warehouse_id))
            .one(self.db.as_ref())
            .await
            .expect("query inventory")
            .expect("inventory row not found")
    }

    pub async fn get_order(&self, order_id: Uuid) -> sales_order::Model {
        sales_order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await
            .expect("query sales order")
            .expect("sales order not found")
    }

    pub async fn get_order_lines(&self, order_id: Uuid) -> Vec<sales_order_line::Model> {
        sales_order_line::Entity::find()
            .filter(sales_order_line::Column::OrderId.eq(order_id))
            .order_by_asc(sales_order_line::Column::LineNumber)
            .all(self.db.as_ref())
            .await
            .expect("query sales order lines")
    }

    pub async fn get_purchase_order(&self, purchase_order_id: Uuid) -> purchase_order::Model {
        purchase_order::Entity::find_by_id(purchase_order_id)
            .one(self.db.as_ref())
            .await
            .expect("query purchase order")
            .expect("purchase order not found")
    }

    pub async fn get_po_lines(&self, purchase_order_id: Uuid) -> Vec<purchase_order_line::Model> {
        purchase_order_line::Entity::find()
            .filter(purchase_order_line::Column::PurchaseOrderId.eq(purchase_order_id))
            .order_by_asc(purchase_order_line::Column::LineNumber)
            .all(self.db.as_ref())
            .await
            .expect("query purchase order lines")
    }

    pub async fn get_shipment(&self, shipment_id: Uuid) -> shipment::Model {
        shipment::Entity::find_by_id(shipment_id)
            .one(self.db.as_ref())
            .await
            .expect("query shipment")
            .expect("shipment not found")
    }

    pub async fn get_movements(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Vec<inventory_movement::Model> {
        inventory_movement::Entity::find()
            .filter(inventory_movement::Column::ProductId.eq(product_id))
            .filter(inventory_movement::Column::WarehouseId.eq(warehouse_id))
            .order_by_asc(inventory_movement::Column::OccurredAt)
            .all(self.db.as_ref())
            .await
            .expect("query inventory movements")
    }

    /// Asserts the stock position and the ledger invariant
    /// `0 <= qty_reserved <= qty_on_hand` in one go.
    pub async fn assert_inventory(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        expected_on_hand: i32,
        expected_reserved: i32,
    ) {
        let row = self.get_inventory(product_id, warehouse_id).await;
        assert_eq!(row.qty_on_hand, expected_on_hand, "qty_on_hand mismatch");
        assert_eq!(row.qty_reserved, expected_reserved, "qty_reserved mismatch");
        assert!(row.qty_reserved >= 0, "qty_reserved went negative");
        assert!(
            row.qty_reserved <= row.qty_on_hand,
            "qty_reserved {} exceeds qty_on_hand {}",
            row.qty_reserved,
            row.qty_on_hand
        );
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
