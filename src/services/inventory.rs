use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionError, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::inventory,
    entities::inventory_movement::{self, MovementType},
    errors::ServiceError,
    events::{Event, EventSender},
};

lazy_static! {
    static ref STOCK_MOVEMENTS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_movements_total",
            "Total number of stock movements recorded"
        ),
        &["movement_type"]
    )
    .expect("metric can be created");
    static ref STOCK_MOVEMENT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_movement_failures_total",
            "Total number of failed stock operations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Manual stock correction request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdjustStockCommand {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    /// Positive or negative correction applied to on-hand stock.
    pub delta_qty: i32,
    #[validate(length(min = 1, max = 100))]
    pub reason: String,
}

/// Outcome of a single ledger write, for callers and audit trails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovementRecord {
    pub movement_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub movement_type: String,
    pub quantity: i32,
    pub new_on_hand: i32,
    pub new_reserved: i32,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovementRecord {
    fn from_write(row: &inventory::Model, movement: &inventory_movement::Model) -> Self {
        Self {
            movement_id: movement.id,
            product_id: movement.product_id,
            warehouse_id: movement.warehouse_id,
            movement_type: movement.movement_type.to_string(),
            quantity: movement.quantity,
            new_on_hand: row.qty_on_hand,
            new_reserved: row.qty_reserved,
            occurred_at: movement.occurred_at,
        }
    }
}

/// The inventory ledger service. All stock mutation in the system passes
/// through here or through the [`ledger`] primitives the other services
/// compose inside their own transactions.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Applies a signed manual correction to on-hand stock.
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        command: AdjustStockCommand,
    ) -> Result<StockMovementRecord, ServiceError> {
        command.validate().map_err(|e| {
            STOCK_MOVEMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            ServiceError::ValidationError(format!("Invalid input: {}", e))
        })?;

        let AdjustStockCommand {
            product_id,
            warehouse_id,
            delta_qty,
            reason,
        } = command;

        let db = self.db_pool.as_ref();
        let event_reason = reason.clone();

        let (row, movement) = db
            .transaction::<_, (inventory::Model, inventory_movement::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        ledger::adjust(txn, product_id, warehouse_id, delta_qty, &reason).await
                    })
                },
            )
            .await
            .map_err(unwrap_transaction_error)?;

        STOCK_MOVEMENTS.with_label_values(&["ADJUSTMENT"]).inc();
        info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            delta_qty = delta_qty,
            new_on_hand = row.qty_on_hand,
            "Inventory adjusted"
        );

        self.event_sender
            .send(Event::InventoryAdjusted {
                product_id,
                warehouse_id,
                delta_qty,
                new_on_hand: row.qty_on_hand,
                reason: event_reason,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(StockMovementRecord::from_write(&row, &movement))
    }

    /// Books received stock into a warehouse. Creates the inventory row on
    /// the first inbound for a (product, warehouse) pair.
    #[instrument(skip(self))]
    pub async fn inbound(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
        reference_doc: Option<String>,
    ) -> Result<StockMovementRecord, ServiceError> {
        let db = self.db_pool.as_ref();
        let reference = reference_doc.clone();

        let (row, movement) = db
            .transaction::<_, (inventory::Model, inventory_movement::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        ledger::inbound(txn, product_id, warehouse_id, qty, reference).await
                    })
                },
            )
            .await
            .map_err(unwrap_transaction_error)?;

        STOCK_MOVEMENTS.with_label_values(&["INBOUND"]).inc();
        info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            qty = qty,
            new_on_hand = row.qty_on_hand,
            "Inbound stock booked"
        );

        self.event_sender
            .send(Event::StockInbound {
                product_id,
                warehouse_id,
                quantity: qty,
                reference_doc,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(StockMovementRecord::from_write(&row, &movement))
    }

    /// Books a physical outbound movement against available stock.
    #[instrument(skip(self))]
    pub async fn outbound(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
        reference_doc: Option<String>,
    ) -> Result<StockMovementRecord, ServiceError> {
        let db = self.db_pool.as_ref();
        let reference = reference_doc.clone();

        let (row, movement) = db
            .transaction::<_, (inventory::Model, inventory_movement::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        ledger::outbound(txn, product_id, warehouse_id, qty, reference).await
                    })
                },
            )
            .await
            .map_err(unwrap_transaction_error)?;

        STOCK_MOVEMENTS.with_label_values(&["OUTBOUND"]).inc();
        info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            qty = qty,
            new_on_hand = row.qty_on_hand,
            "Outbound stock booked"
        );

        self.event_sender
            .send(Event::StockOutbound {
                product_id,
                warehouse_id,
                quantity: qty,
                reference_doc,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(StockMovementRecord::from_write(&row, &movement))
    }

    /// Reserves up to `qty` units of available stock and returns the amount
    /// actually reserved. A short grant is a normal outcome, not an error;
    /// the caller books the shortfall as backorder.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
    ) -> Result<i32, ServiceError> {
        let db = self.db_pool.as_ref();

        let reserved = db
            .transaction::<_, i32, ServiceError>(move |txn| {
                Box::pin(async move { ledger::reserve(txn, product_id, warehouse_id, qty).await })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        self.event_sender
            .send(Event::InventoryReserved {
                product_id,
                warehouse_id,
                requested_qty: qty,
                reserved_qty: reserved,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(reserved)
    }

    /// Releases up to `qty` reserved units. Clamped at zero, so releasing
    /// more than is currently reserved is tolerated.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
    ) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();

        db.transaction::<_, (), ServiceError>(move |txn| {
            Box::pin(async move {
                ledger::release(txn, product_id, warehouse_id, qty).await?;
                Ok(())
            })
        })
        .await
        .map_err(unwrap_transaction_error)?;

        self.event_sender
            .send(Event::InventoryReleased {
                product_id,
                warehouse_id,
                quantity: qty,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(())
    }

    /// Gets the stock position for a product at a warehouse.
    #[instrument(skip(self))]
    pub async fn get_inventory(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<inventory::Model>, ServiceError> {
        ledger::find_inventory(self.db_pool.as_ref(), product_id, warehouse_id).await
    }

    /// Lists the movement history for a product at a warehouse, newest
    /// first, with pagination.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<inventory_movement::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();

        let paginator = inventory_movement::Entity::find()
            .filter(inventory_movement::Column::ProductId.eq(product_id))
            .filter(inventory_movement::Column::WarehouseId.eq(warehouse_id))
            .order_by_desc(inventory_movement::Column::OccurredAt)
            .paginate(db, limit);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let movements = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((movements, total))
    }
}

pub(crate) fn unwrap_transaction_error(err: TransactionError<ServiceError>) -> ServiceError {
    match err {
        TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}

/// Ledger primitives over any connection, composable inside a caller-owned
/// transaction. Every quantity write is a compare-and-swap on the row's
/// `version`; exhausting the retries surfaces as `ConcurrentModification`.
pub mod ledger {
    use sea_orm::sea_query::Expr;
    use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

    use super::*;
    use crate::entities::{product, warehouse};

    /// CAS attempts before giving up on a contended inventory row.
    const OPTIMISTIC_RETRIES: u32 = 5;

    pub async fn find_inventory<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<inventory::Model>, ServiceError> {
        inventory::Entity::find()
            .filter(inventory::Column::ProductId.eq(product_id))
            .filter(inventory::Column::WarehouseId.eq(warehouse_id))
            .one(conn)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn require_inventory<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<inventory::Model, ServiceError> {
        find_inventory(conn, product_id, warehouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Inventory not found for product {} in warehouse {}",
                    product_id, warehouse_id
                ))
            })
    }

    async fn ensure_product_and_warehouse<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<(), ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(conn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        warehouse::Entity::find_by_id(warehouse_id)
            .one(conn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Warehouse {} not found", warehouse_id))
            })?;

        Ok(())
    }

    /// Compare-and-swap write of both quantities; true when this writer won.
    async fn write_quantities<C: ConnectionTrait>(
        conn: &C,
        row: &inventory::Model,
        new_on_hand: i32,
        new_reserved: i32,
    ) -> Result<bool, ServiceError> {
        let result = inventory::Entity::update_many()
            .col_expr(inventory::Column::QtyOnHand, Expr::value(new_on_hand))
            .col_expr(inventory::Column::QtyReserved, Expr::value(new_reserved))
            .col_expr(inventory::Column::Version, Expr::value(row.version + 1))
            .col_expr(
                inventory::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(inventory::Column::Id.eq(row.id))
            .filter(inventory::Column::Version.eq(row.version))
            .exec(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(result.rows_affected == 1)
    }

    async fn record_movement<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
        reference_doc: Option<String>,
    ) -> Result<inventory_movement::Model, ServiceError> {
        let movement = inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            warehouse_id: Set(warehouse_id),
            movement_type: Set(movement_type),
            quantity: Set(quantity),
            reference_doc: Set(reference_doc),
            occurred_at: Set(Utc::now()),
        };

        movement
            .insert(conn)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn create_empty_row<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<inventory::Model, ServiceError> {
        let row = inventory::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            warehouse_id: Set(warehouse_id),
            qty_on_hand: Set(0),
            qty_reserved: Set(0),
            version: Set(1),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        row.insert(conn).await.map_err(ServiceError::DatabaseError)
    }

    /// Applies a signed correction to on-hand stock. A negative delta may
    /// not eat into reserved stock.
    pub async fn adjust<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
        delta_qty: i32,
        reason: &str,
    ) -> Result<(inventory::Model, inventory_movement::Model), ServiceError> {
        ensure_product_and_warehouse(conn, product_id, warehouse_id).await?;

        for _ in 0..OPTIMISTIC_RETRIES {
            let row = require_inventory(conn, product_id, warehouse_id).await?;

            if delta_qty < 0 && row.qty_on_hand < row.qty_reserved + delta_qty.abs() {
                return Err(ServiceError::InsufficientStock(format!(
                    "insufficient stock for negative adjustment: on hand {}, reserved {}, delta {}",
                    row.qty_on_hand, row.qty_reserved, delta_qty
                )));
            }

            let new_on_hand = row.qty_on_hand + delta_qty;
            if write_quantities(conn, &row, new_on_hand, row.qty_reserved).await? {
                let movement = record_movement(
                    conn,
                    product_id,
                    warehouse_id,
                    MovementType::Adjustment,
                    delta_qty,
                    Some(reason.to_string()),
                )
                .await?;
                let mut updated = row;
                updated.qty_on_hand = new_on_hand;
                updated.version += 1;
                return Ok((updated, movement));
            }
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }

    /// Books received stock. Creates the inventory row lazily on the first
    /// inbound for the pair.
    pub async fn inbound<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
        reference_doc: Option<String>,
    ) -> Result<(inventory::Model, inventory_movement::Model), ServiceError> {
        if qty <= 0 {
            return Err(ServiceError::ValidationError(
                "inbound quantity must be positive".to_string(),
            ));
        }

        ensure_product_and_warehouse(conn, product_id, warehouse_id).await?;

        for _ in 0..OPTIMISTIC_RETRIES {
            let row = match find_inventory(conn, product_id, warehouse_id).await? {
                Some(row) => row,
                None => create_empty_row(conn, product_id, warehouse_id).await?,
            };

            let new_on_hand = row.qty_on_hand + qty;
            if write_quantities(conn, &row, new_on_hand, row.qty_reserved).await? {
                let movement = record_movement(
                    conn,
                    product_id,
                    warehouse_id,
                    MovementType::Inbound,
                    qty,
                    reference_doc,
                )
                .await?;
                let mut updated = row;
                updated.qty_on_hand = new_on_hand;
                updated.version += 1;
                return Ok((updated, movement));
            }
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }

    /// Books a physical outbound movement against available stock.
    pub async fn outbound<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
        reference_doc: Option<String>,
    ) -> Result<(inventory::Model, inventory_movement::Model), ServiceError> {
        if qty <= 0 {
            return Err(ServiceError::ValidationError(
                "outbound quantity must be positive".to_string(),
            ));
        }

        ensure_product_and_warehouse(conn, product_id, warehouse_id).await?;

        for _ in 0..OPTIMISTIC_RETRIES {
            let row = require_inventory(conn, product_id, warehouse_id).await?;

            if row.available() < qty {
                return Err(ServiceError::InsufficientStock(format!(
                    "insufficient stock: available {}, requested {}",
                    row.available(),
                    qty
                )));
            }

            let new_on_hand = row.qty_on_hand - qty;
            if write_quantities(conn, &row, new_on_hand, row.qty_reserved).await? {
                let movement = record_movement(
                    conn,
                    product_id,
                    warehouse_id,
                    MovementType::Outbound,
                    qty,
                    reference_doc,
                )
                .await?;
                let mut updated = row;
                updated.qty_on_hand = new_on_hand;
                updated.version += 1;
                return Ok((updated, movement));
            }
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }

    /// Reserves `min(qty, available)` units and returns the granted amount.
    /// Partial grants are data, not errors.
    pub async fn reserve<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
    ) -> Result<i32, ServiceError> {
        for _ in 0..OPTIMISTIC_RETRIES {
            let row = require_inventory(conn, product_id, warehouse_id).await?;

            let granted = qty.min(row.available()).max(0);
            if granted == 0 {
                return Ok(0);
            }

            let new_reserved = row.qty_reserved + granted;
            if write_quantities(conn, &row, row.qty_on_hand, new_reserved).await? {
                return Ok(granted);
            }
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }

    /// Releases up to `qty` reserved units, clamped at zero. Tolerates
    /// over-release from stale callers.
    pub async fn release<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
        qty: i32,
    ) -> Result<i32, ServiceError> {
        for _ in 0..OPTIMISTIC_RETRIES {
            let row = require_inventory(conn, product_id, warehouse_id).await?;

            let new_reserved = (row.qty_reserved - qty).max(0);
            let freed = row.qty_reserved - new_reserved;
            if freed == 0 {
                return Ok(0);
            }

            if write_quantities(conn, &row, row.qty_on_hand, new_reserved).await? {
                return Ok(freed);
            }
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }

    /// Drops the entire reservation on a row; used when goods physically
    /// leave the warehouse.
    pub async fn release_all<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<i32, ServiceError> {
        for _ in 0..OPTIMISTIC_RETRIES {
            let row = require_inventory(conn, product_id, warehouse_id).await?;

            if row.qty_reserved == 0 {
                return Ok(0);
            }

            let freed = row.qty_reserved;
            if write_quantities(conn, &row, row.qty_on_hand, 0).await? {
                return Ok(freed);
            }
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }
}
