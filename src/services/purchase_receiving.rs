use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::purchase_order::{self, PurchaseOrderStatus},
    entities::purchase_order_line,
    entities::supplier,
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::{ledger, unwrap_transaction_error},
};

lazy_static! {
    static ref PURCHASE_ORDER_RECEIPTS: IntCounter = IntCounter::new(
        "purchase_order_receipts_total",
        "Total number of purchase orders received into stock"
    )
    .expect("metric can be created");
    static ref PURCHASE_ORDER_RECEIPT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "purchase_order_receipt_failures_total",
            "Total number of failed purchase order receipts"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Receipt request: quantities pair positionally with the purchase
/// order's lines.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceivePurchaseOrderCommand {
    pub purchase_order_id: Uuid,
    #[validate(length(min = 1))]
    pub received_quantities: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub product_id: Uuid,
    pub ordered_qty: i32,
    pub received_qty: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseReceiptResult {
    pub purchase_order_id: Uuid,
    pub previous_status: String,
    pub status: String,
    pub total_received: i32,
    pub lines: Vec<ReceiptLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderStatusChange {
    pub purchase_order_id: Uuid,
    pub previous_status: String,
    pub status: String,
    pub changed_at: DateTime<Utc>,
}

/// Drives a purchase order through approval, receiving (which injects
/// stock through the ledger), and cancellation.
#[derive(Clone)]
pub struct PurchaseReceivingService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl PurchaseReceivingService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Approves a freshly created purchase order.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<PurchaseOrderStatusChange, ServiceError> {
        let db = self.db_pool.as_ref();

        let result = db
            .transaction::<_, PurchaseOrderStatusChange, ServiceError>(move |txn| {
                Box::pin(async move {
                    let po = find_purchase_order(txn, purchase_order_id).await?;

                    if !po.status.can_approve() {
                        return Err(ServiceError::Conflict(format!(
                            "purchase order cannot be approved from status {}",
                            po.status
                        )));
                    }

                    let previous_status = po.status;
                    let changed_at = Utc::now();

                    let mut active: purchase_order::ActiveModel = po.into();
                    active.status = Set(PurchaseOrderStatus::Approved);
                    active.updated_at = Set(Some(changed_at));
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(PurchaseOrderStatusChange {
                        purchase_order_id,
                        previous_status: previous_status.to_string(),
                        status: PurchaseOrderStatus::Approved.to_string(),
                        changed_at,
                    })
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(purchase_order_id = %purchase_order_id, "Purchase order approved");

        self.event_sender
            .send(Event::PurchaseOrderApproved(purchase_order_id))
            .await
            .map_err(ServiceError::EventError)?;

        Ok(result)
    }

    /// Receives an approved purchase order into stock.
    ///
    /// Quantities pair positionally with the order's lines. Zero-quantity
    /// entries record the receipt without touching stock; positive entries
    /// require the supplier to have an associated warehouse and an
    /// existing inventory row for the pair.
    #[instrument(skip(self))]
    pub async fn receive(
        &self,
        command: ReceivePurchaseOrderCommand,
    ) -> Result<PurchaseReceiptResult, ServiceError> {
        command.validate().map_err(|e| {
            PURCHASE_ORDER_RECEIPT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            ServiceError::ValidationError(format!("Invalid input: {}", e))
        })?;

        let ReceivePurchaseOrderCommand {
            purchase_order_id,
            received_quantities,
        } = command;

        let db = self.db_pool.as_ref();

        let result = db
            .transaction::<_, PurchaseReceiptResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    let po = find_purchase_order(txn, purchase_order_id).await?;

                    if !po.status.can_receive() {
                        return Err(ServiceError::Conflict(format!(
                            "purchase order cannot be received from status {}",
                            po.status
                        )));
                    }

                    let lines = purchase_order_line::Entity::find()
                        .filter(purchase_order_line::Column::PurchaseOrderId.eq(purchase_order_id))
                        .order_by_asc(purchase_order_line::Column::LineNumber)
                        .all(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    if lines.len() != received_quantities.len() {
                        return Err(ServiceError::ValidationError(format!(
                            "received {} quantities for {} purchase order lines",
                            received_quantities.len(),
                            lines.len()
                        )));
                    }

                    let supplier = supplier::Entity::find_by_id(po.supplier_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Supplier {} not found",
                                po.supplier_id
                            ))
                        })?;

                    let mut total_received = 0i32;
                    let mut line_results = Vec::with_capacity(lines.len());

                    for (line, &received_qty) in lines.iter().zip(received_quantities.iter()) {
                        if received_qty < 0 {
                            return Err(ServiceError::ValidationError(
                                "received quantity cannot be negative".to_string(),
                            ));
                        }
                        if received_qty > line.quantity {
                            return Err(ServiceError::ValidationError(format!(
                                "received quantity {} exceeds ordered quantity {}",
                                received_qty, line.quantity
                            )));
                        }

                        let mut active: purchase_order_line::ActiveModel = line.clone().into();
                        active.received_qty = Set(received_qty);
                        active
                            .update(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;

                        if received_qty > 0 {
                            let warehouse_id = supplier.warehouse_id.ok_or_else(|| {
                                ServiceError::Conflict(
                                    "supplier has no associated warehouse".to_string(),
                                )
                            })?;

                            ledger::require_inventory(txn, line.product_id, warehouse_id).await?;
                            ledger::inbound(
                                txn,
                                line.product_id,
                                warehouse_id,
                                received_qty,
                                Some(format!("PO{}", po.po_number)),
                            )
                            .await?;

                            total_received += received_qty;
                        }

                        line_results.push(ReceiptLine {
                            product_id: line.product_id,
                            ordered_qty: line.quantity,
                            received_qty,
                        });
                    }

                    let previous_status = po.status;

                    let mut active: purchase_order::ActiveModel = po.into();
                    active.status = Set(PurchaseOrderStatus::Received);
                    active.updated_at = Set(Some(Utc::now()));
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(PurchaseReceiptResult {
                        purchase_order_id,
                        previous_status: previous_status.to_string(),
                        status: PurchaseOrderStatus::Received.to_string(),
                        total_received,
                        lines: line_results,
                    })
                })
            })
            .await
            .map_err(|e| {
                let err = unwrap_transaction_error(e);
                PURCHASE_ORDER_RECEIPT_FAILURES
                    .with_label_values(&[failure_label(&err)])
                    .inc();
                err
            })?;

        info!(
            purchase_order_id = %result.purchase_order_id,
            total_received = result.total_received,
            line_count = result.lines.len(),
            "Purchase order received"
        );

        self.event_sender
            .send(Event::PurchaseOrderReceived {
                purchase_order_id: result.purchase_order_id,
                total_received: result.total_received,
            })
            .await
            .map_err(ServiceError::EventError)?;

        PURCHASE_ORDER_RECEIPTS.inc();

        Ok(result)
    }

    /// Cancels an approved purchase order. Nothing has been received yet,
    /// so no stock moves.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<PurchaseOrderStatusChange, ServiceError> {
        let db = self.db_pool.as_ref();

        let result = db
            .transaction::<_, PurchaseOrderStatusChange, ServiceError>(move |txn| {
                Box::pin(async move {
                    let po = find_purchase_order(txn, purchase_order_id).await?;

                    if !po.status.can_cancel() {
                        return Err(ServiceError::Conflict(format!(
                            "purchase order cannot be canceled from status {}",
                            po.status
                        )));
                    }

                    let previous_status = po.status;
                    let changed_at = Utc::now();

                    let mut active: purchase_order::ActiveModel = po.into();
                    active.status = Set(PurchaseOrderStatus::Canceled);
                    active.canceled_at = Set(Some(changed_at));
                    active.updated_at = Set(Some(changed_at));
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(PurchaseOrderStatusChange {
                        purchase_order_id,
                        previous_status: previous_status.to_string(),
                        status: PurchaseOrderStatus::Canceled.to_string(),
                        changed_at,
                    })
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(purchase_order_id = %purchase_order_id, "Purchase order canceled");

        self.event_sender
            .send(Event::PurchaseOrderCancelled(purchase_order_id))
            .await
            .map_err(ServiceError::EventError)?;

        Ok(result)
    }
}

async fn find_purchase_order<C: sea_orm::ConnectionTrait>(
    conn: &C,
    purchase_order_id: Uuid,
) -> Result<purchase_order::Model, ServiceError> {
    purchase_order::Entity::find_by_id(purchase_order_id)
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Purchase order {} not found", purchase_order_id))
        })
}

fn failure_label(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotFound(_) => "not_found",
        ServiceError::ValidationError(_) => "validation_error",
        ServiceError::Conflict(_) => "conflict",
        ServiceError::ConcurrentModification(_) => "concurrent_modification",
        _ => "internal",
    }
}
