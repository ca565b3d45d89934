use std::sync::Arc;

use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
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
    static ref ORDER_RESERVATIONS: IntCounter = IntCounter::new(
        "order_reservations_total",
        "Total number of sales order reservations"
    )
    .expect("metric can be created");
    static ref ORDER_RESERVATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_reservation_failures_total",
            "Total number of failed sales order reservations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Per-line outcome of a reservation. `reserved_qty + backorder_qty`
/// always equals `requested_qty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineReservation {
    pub product_id: Uuid,
    pub requested_qty: i32,
    pub reserved_qty: i32,
    pub backorder_qty: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReservationResult {
    pub order_id: Uuid,
    pub previous_status: String,
    pub status: String,
    pub partial: bool,
    pub lines: Vec<LineReservation>,
}

/// Reserves warehouse stock against a sales order's lines, line by line,
/// booking whatever each line cannot get as backorder.
#[derive(Clone)]
pub struct OrderReservationService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderReservationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Reserves stock for every line of the order.
    ///
    /// Lines are processed in line order and each reserves as much as the
    /// warehouse has available; a short line marks the whole order
    /// `PartialReserved` but never rolls back its siblings. Only a hard
    /// failure (missing order, wrong status, missing inventory row) aborts
    /// the operation.
    #[instrument(skip(self))]
    pub async fn reserve_order(
        &self,
        order_id: Uuid,
    ) -> Result<OrderReservationResult, ServiceError> {
        let db = self.db_pool.as_ref();

        let result = db
            .transaction::<_, OrderReservationResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = sales_order::Entity::find_by_id(order_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Sales order {} not found", order_id))
                        })?;

                    if !order.status.can_reserve() {
                        return Err(ServiceError::InvalidStatus(format!(
                            "order cannot be reserved from status {}",
                            order.status
                        )));
                    }

                    let warehouse_id = order.warehouse_id.ok_or_else(|| {
                        ServiceError::Conflict(format!(
                            "order {} has no warehouse to reserve against",
                            order.order_number
                        ))
                    })?;

                    let lines = sales_order_line::Entity::find()
                        .filter(sales_order_line::Column::OrderId.eq(order_id))
                        .order_by_asc(sales_order_line::Column::LineNumber)
                        .all(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    let mut partial = false;
                    let mut line_results = Vec::with_capacity(lines.len());

                    for line in lines {
                        let reserved =
                            ledger::reserve(txn, line.product_id, warehouse_id, line.quantity)
                                .await?;
                        let backorder_qty = line.quantity - reserved;
                        if backorder_qty > 0 {
                            partial = true;
                        }

                        let mut active: sales_order_line::ActiveModel = line.clone().into();
                        active.backorder_qty = Set(backorder_qty);
                        active
                            .update(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;

                        line_results.push(LineReservation {
                            product_id: line.product_id,
                            requested_qty: line.quantity,
                            reserved_qty: reserved,
                            backorder_qty,
                        });
                    }

                    let previous_status = order.status;
                    let new_status = if partial {
                        SalesOrderStatus::PartialReserved
                    } else {
                        SalesOrderStatus::Reserved
                    };

                    let mut active: sales_order::ActiveModel = order.into();
                    active.status = Set(new_status);
                    active.updated_at = Set(Some(Utc::now()));
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(OrderReservationResult {
                        order_id,
                        previous_status: previous_status.to_string(),
                        status: new_status.to_string(),
                        partial,
                        lines: line_results,
                    })
                })
            })
            .await
            .map_err(|e| {
                let err = unwrap_transaction_error(e);
                ORDER_RESERVATION_FAILURES
                    .with_label_values(&[failure_label(&err)])
                    .inc();
                err
            })?;

        self.log_and_trigger_events(&result).await?;
        ORDER_RESERVATIONS.inc();

        Ok(result)
    }

    async fn log_and_trigger_events(
        &self,
        result: &OrderReservationResult,
    ) -> Result<(), ServiceError> {
        info!(
            order_id = %result.order_id,
            status = %result.status,
            partial = result.partial,
            line_count = result.lines.len(),
            "Sales order reserved"
        );

        self.event_sender
            .send(Event::OrderReserved {
                order_id: result.order_id,
                partial: result.partial,
            })
            .await
            .map_err(ServiceError::EventError)?;

        for line in result.lines.iter().filter(|l| l.backorder_qty > 0) {
            warn!(
                order_id = %result.order_id,
                product_id = %line.product_id,
                requested = line.requested_qty,
                reserved = line.reserved_qty,
                "Line reserved short; remainder backordered"
            );

            self.event_sender
                .send(Event::PartialReservationWarning {
                    order_id: result.order_id,
                    product_id: line.product_id,
                    requested_qty: line.requested_qty,
                    reserved_qty: line.reserved_qty,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok(())
    }
}

fn failure_label(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotFound(_) => "not_found",
        ServiceError::InvalidStatus(_) => "invalid_status",
        ServiceError::Conflict(_) => "conflict",
        ServiceError::ConcurrentModification(_) => "concurrent_modification",
        _ => "internal",
    }
}
