use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
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
    entities::shipment::{self, ShipmentStatus, ShippingCarrier},
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::{ledger, unwrap_transaction_error},
};

lazy_static! {
    static ref SHIPMENTS_CREATED: IntCounter = IntCounter::new(
        "shipments_created_total",
        "Total number of shipments planned"
    )
    .expect("metric can be created");
    static ref ORDERS_SHIPPED: IntCounter =
        IntCounter::new("orders_shipped_total", "Total number of orders shipped")
            .expect("metric can be created");
    static ref ORDER_SHIP_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_ship_failures_total",
            "Total number of failed order shipments"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippedLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipOrderResult {
    pub order_id: Uuid,
    pub previous_status: String,
    pub status: String,
    pub tracking_number: String,
    pub lines: Vec<ShippedLine>,
}

/// Drives shipments from planning through dispatch to delivery, and moves
/// the owning sales order along with them.
#[derive(Clone)]
pub struct ShipmentService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    cutoff_hour: u32,
}

/// Departure is always planned for the next day's cutoff; same-day
/// dispatch is never offered, however early the order lands.
fn next_departure(now: DateTime<Utc>, cutoff_hour: u32) -> DateTime<Utc> {
    let next_day = now.date_naive() + Duration::days(1);
    let at_cutoff = next_day
        .and_hms_opt(cutoff_hour.min(23), 0, 0)
        .unwrap_or_else(|| next_day.and_time(NaiveTime::MIN));
    Utc.from_utc_datetime(&at_cutoff)
}

impl ShipmentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, cutoff_hour: u32) -> Self {
        Self {
            db_pool,
            event_sender,
            cutoff_hour,
        }
    }

    /// Plans a shipment for a fully reserved order.
    #[instrument(skip(self))]
    pub async fn create_shipment(
        &self,
        order_id: Uuid,
        carrier: ShippingCarrier,
    ) -> Result<shipment::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let planned_departure = next_departure(Utc::now(), self.cutoff_hour);

        let created = db
            .transaction::<_, shipment::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = sales_order::Entity::find_by_id(order_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .filter(|o| o.status.can_ship())
                        .ok_or_else(|| {
                            ServiceError::NotFound("order not found or not reserved".to_string())
                        })?;

                    let existing = shipment::Entity::find()
                        .filter(shipment::Column::OrderId.eq(order_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;
                    if existing.is_some() {
                        return Err(ServiceError::Conflict(format!(
                            "shipment already exists for order {}",
                            order.order_number
                        )));
                    }

                    let new_shipment = shipment::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_id: Set(order_id),
                        carrier: Set(carrier),
                        tracking_number: Set(format!("TRACK{}", order.order_number)),
                        status: Set(ShipmentStatus::Planned),
                        planned_departure: Set(planned_departure),
                        delivered_at: Set(None),
                        created_at: Set(Utc::now()),
                        ..Default::default()
                    };

                    new_shipment
                        .insert(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(
            shipment_id = %created.id,
            order_id = %order_id,
            planned_departure = %created.planned_departure,
            "Shipment planned"
        );

        self.event_sender
            .send(Event::ShipmentCreated(created.id))
            .await
            .map_err(ServiceError::EventError)?;

        SHIPMENTS_CREATED.inc();

        Ok(created)
    }

    /// Ships a reserved order: every line leaves the warehouse as an
    /// outbound movement, its reservation is dropped in full, and the
    /// order moves to `Shipped`.
    #[instrument(skip(self))]
    pub async fn ship_order(&self, order_id: Uuid) -> Result<ShipOrderResult, ServiceError> {
        let db = self.db_pool.as_ref();

        let result = db
            .transaction::<_, ShipOrderResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = sales_order::Entity::find_by_id(order_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .filter(|o| o.status.can_ship())
                        .ok_or_else(|| {
                            ServiceError::NotFound("order not found or not reserved".to_string())
                        })?;

                    let warehouse_id = order.warehouse_id.ok_or_else(|| {
                        ServiceError::Conflict(format!(
                            "order {} has no warehouse to ship from",
                            order.order_number
                        ))
                    })?;

                    let lines = sales_order_line::Entity::find()
                        .filter(sales_order_line::Column::OrderId.eq(order_id))
                        .order_by_asc(sales_order_line::Column::LineNumber)
                        .all(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    let reference = format!("SO{}", order.order_number);
                    let mut shipped_lines = Vec::with_capacity(lines.len());

                    for line in lines.iter().filter(|l| l.quantity > 0) {
                        ledger::outbound(
                            txn,
                            line.product_id,
                            warehouse_id,
                            line.quantity,
                            Some(reference.clone()),
                        )
                        .await?;
                        ledger::release_all(txn, line.product_id, warehouse_id).await?;

                        let mut active: sales_order_line::ActiveModel = line.clone().into();
                        active.backorder_qty = Set(0);
                        active
                            .update(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;

                        shipped_lines.push(ShippedLine {
                            product_id: line.product_id,
                            quantity: line.quantity,
                        });
                    }

                    let tracking_number = shipment::Entity::find()
                        .filter(shipment::Column::OrderId.eq(order_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .map(|s| s.tracking_number)
                        .unwrap_or_else(|| format!("TRACK{}", order.order_number));

                    let previous_status = order.status;

                    let mut active: sales_order::ActiveModel = order.into();
                    active.status = Set(SalesOrderStatus::Shipped);
                    active.updated_at = Set(Some(Utc::now()));
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(ShipOrderResult {
                        order_id,
                        previous_status: previous_status.to_string(),
                        status: SalesOrderStatus::Shipped.to_string(),
                        tracking_number,
                        lines: shipped_lines,
                    })
                })
            })
            .await
            .map_err(|e| {
                let err = unwrap_transaction_error(e);
                ORDER_SHIP_FAILURES
                    .with_label_values(&[failure_label(&err)])
                    .inc();
                err
            })?;

        info!(
            order_id = %result.order_id,
            tracking_number = %result.tracking_number,
            line_count = result.lines.len(),
            "Order shipped"
        );

        self.event_sender
            .send(Event::OrderShipped(result.order_id))
            .await
            .map_err(ServiceError::EventError)?;

        ORDERS_SHIPPED.inc();

        Ok(result)
    }

    /// Confirms delivery of an in-transit shipment and cascades the
    /// delivered status onto the order.
    #[instrument(skip(self))]
    pub async fn deliver_shipment(
        &self,
        shipment_id: Uuid,
    ) -> Result<shipment::Model, ServiceError> {
        let db = self.db_pool.as_ref();

        let delivered = db
            .transaction::<_, shipment::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let shipment_row = shipment::Entity::find_by_id(shipment_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .filter(|s| s.status.can_deliver())
                        .ok_or_else(|| {
                            ServiceError::Conflict(
                                "shipment not found or not in transit".to_string(),
                            )
                        })?;

                    let delivered_at = Utc::now();
                    let order_id = shipment_row.order_id;

                    let mut active: shipment::ActiveModel = shipment_row.into();
                    active.status = Set(ShipmentStatus::Delivered);
                    active.delivered_at = Set(Some(delivered_at));
                    active.updated_at = Set(Some(delivered_at));
                    let updated = active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    let order = sales_order::Entity::find_by_id(order_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Sales order {} not found", order_id))
                        })?;

                    let mut order_active: sales_order::ActiveModel = order.into();
                    order_active.status = Set(SalesOrderStatus::Delivered);
                    order_active.updated_at = Set(Some(delivered_at));
                    order_active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(updated)
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(
            shipment_id = %delivered.id,
            order_id = %delivered.order_id,
            "Shipment delivered"
        );

        self.event_sender
            .send(Event::ShipmentDelivered(delivered.id))
            .await
            .map_err(ServiceError::EventError)?;
        self.event_sender
            .send(Event::OrderDelivered(delivered.order_id))
            .await
            .map_err(ServiceError::EventError)?;

        Ok(delivered)
    }

    /// Applies a carrier status push (e.g. `Planned -> InTransit`). No
    /// stock side effects.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        shipment_id: Uuid,
        status: ShipmentStatus,
    ) -> Result<shipment::Model, ServiceError> {
        let db = self.db_pool.as_ref();

        let shipment_row = shipment::Entity::find_by_id(shipment_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Shipment {} not found", shipment_id))
            })?;

        let old_status = shipment_row.status;

        let mut active: shipment::ActiveModel = shipment_row.into();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(db).await.map_err(ServiceError::DatabaseError)?;

        info!(
            shipment_id = %shipment_id,
            old_status = %old_status,
            new_status = %status,
            "Shipment status updated"
        );

        self.event_sender
            .send(Event::ShipmentStatusChanged {
                shipment_id,
                old_status: old_status.to_string(),
                new_status: status.to_string(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(updated)
    }

    /// Gets a shipment by ID.
    #[instrument(skip(self))]
    pub async fn get_shipment(
        &self,
        shipment_id: Uuid,
    ) -> Result<Option<shipment::Model>, ServiceError> {
        shipment::Entity::find_by_id(shipment_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Gets the shipment planned for an order, if any.
    #[instrument(skip(self))]
    pub async fn get_shipment_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<shipment::Model>, ServiceError> {
        shipment::Entity::find()
            .filter(shipment::Column::OrderId.eq(order_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Finds a shipment by tracking number.
    #[instrument(skip(self))]
    pub async fn find_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<shipment::Model>, ServiceError> {
        shipment::Entity::find()
            .filter(shipment::Column::TrackingNumber.eq(tracking_number))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

fn failure_label(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotFound(_) => "not_found",
        ServiceError::Conflict(_) => "conflict",
        ServiceError::InsufficientStock(_) => "insufficient_stock",
        ServiceError::ConcurrentModification(_) => "concurrent_modification",
        _ => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn departure_before_cutoff_still_rolls_to_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap();
        let departure = next_departure(now, 14);
        assert_eq!(departure, Utc.with_ymd_and_hms(2024, 3, 11, 14, 0, 0).unwrap());
    }

    #[test]
    fn departure_after_cutoff_rolls_to_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 17, 45, 0).unwrap();
        let departure = next_departure(now, 14);
        assert_eq!(departure, Utc.with_ymd_and_hms(2024, 3, 11, 14, 0, 0).unwrap());
    }

    #[test]
    fn departure_crosses_month_boundaries() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 0).unwrap();
        let departure = next_departure(now, 8);
        assert_eq!(departure, Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn out_of_range_cutoff_is_clamped() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let departure = next_departure(now, 99);
        assert_eq!(departure.hour(), 23);
    }
}
