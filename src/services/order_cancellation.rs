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

use crate::{
    db::DbPool,
    entities::sales_order::{self, SalesOrderStatus},
    entities::sales_order_line,
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::{ledger, unwrap_transaction_error},
};

lazy_static! {
    static ref ORDER_CANCELLATIONS: IntCounter = IntCounter::new(
        "order_cancellations_total",
        "Total number of sales order cancellations"
    )
    .expect("metric can be created");
    static ref ORDER_CANCELLATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_cancellation_failures_total",
            "Total number of failed sales order cancellations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanceledLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancellationResult {
    pub order_id: Uuid,
    pub previous_status: String,
    pub status: String,
    pub stock_freed: i32,
    pub lines_canceled: u32,
    pub lines: Vec<CanceledLine>,
    pub canceled_at: DateTime<Utc>,
}

/// Cancels a sales order and releases whatever stock its lines had
/// reserved.
#[derive(Clone)]
pub struct OrderCancellationService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderCancellationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Cancels the order and releases its reservations.
    ///
    /// Each line releases its full requested quantity rather than the
    /// reserved portion; the ledger's clamp-at-zero makes that restore
    /// exactly what was reserved, since the backordered remainder never
    /// held stock. Any line failure (e.g. a missing inventory row) aborts
    /// the whole cancellation.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
    ) -> Result<OrderCancellationResult, ServiceError> {
        let db = self.db_pool.as_ref();

        let result = db
            .transaction::<_, OrderCancellationResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = sales_order::Entity::find_by_id(order_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Sales order {} not found", order_id))
                        })?;

                    if !order.status.can_cancel() {
                        return Err(ServiceError::Conflict(format!(
                            "order cannot be canceled from status {}",
                            order.status
                        )));
                    }

                    let lines = sales_order_line::Entity::find()
                        .filter(sales_order_line::Column::OrderId.eq(order_id))
                        .order_by_asc(sales_order_line::Column::LineNumber)
                        .all(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    let mut stock_freed = 0i32;
                    let mut lines_canceled = 0u32;
                    let mut line_results = Vec::new();

                    for line in lines.iter().filter(|l| l.quantity > 0) {
                        let warehouse_id = order.warehouse_id.ok_or_else(|| {
                            ServiceError::Conflict(format!(
                                "order {} has no warehouse to release stock into",
                                order.order_number
                            ))
                        })?;

                        ledger::require_inventory(txn, line.product_id, warehouse_id).await?;
                        ledger::release(txn, line.product_id, warehouse_id, line.quantity).await?;

                        let mut active: sales_order_line::ActiveModel = line.clone().into();
                        active.backorder_qty = Set(0);
                        active
                            .update(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;

                        stock_freed += line.quantity;
                        lines_canceled += 1;
                        line_results.push(CanceledLine {
                            product_id: line.product_id,
                            quantity: line.quantity,
                        });
                    }

                    let previous_status = order.status;
                    let canceled_at = Utc::now();

                    let mut active: sales_order::ActiveModel = order.into();
                    active.status = Set(SalesOrderStatus::Canceled);
                    active.canceled_at = Set(Some(canceled_at));
                    active.updated_at = Set(Some(canceled_at));
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(OrderCancellationResult {
                        order_id,
                        previous_status: previous_status.to_string(),
                        status: SalesOrderStatus::Canceled.to_string(),
                        stock_freed,
                        lines_canceled,
                        lines: line_results,
                        canceled_at,
                    })
                })
            })
            .await
            .map_err(|e| {
                let err = unwrap_transaction_error(e);
                ORDER_CANCELLATION_FAILURES
                    .with_label_values(&[failure_label(&err)])
                    .inc();
                err
            })?;

        info!(
            order_id = %result.order_id,
            previous_status = %result.previous_status,
            stock_freed = result.stock_freed,
            lines_canceled = result.lines_canceled,
            "Sales order canceled"
        );

        self.event_sender
            .send(Event::OrderCancelled {
                order_id: result.order_id,
                stock_freed: result.stock_freed,
            })
            .await
            .map_err(ServiceError::EventError)?;

        ORDER_CANCELLATIONS.inc();

        Ok(result)
    }
}

fn failure_label(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotFound(_) => "not_found",
        ServiceError::Conflict(_) => "conflict",
        ServiceError::ConcurrentModification(_) => "concurrent_modification",
        _ => "internal",
    }
}
