use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sales order lifecycle:
/// `Created -> {Reserved, PartialReserved} -> Shipped -> Delivered`,
/// with `Created | Reserved | PartialReserved -> Canceled` as the
/// terminal cancellation branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SalesOrderStatus {
    #[sea_orm(string_value = "CREATED")]
    Created,
    #[sea_orm(string_value = "RESERVED")]
    Reserved,
    #[sea_orm(string_value = "PARTIAL_RESERVED")]
    PartialReserved,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELED")]
    Canceled,
}

impl SalesOrderStatus {
    pub fn can_reserve(&self) -> bool {
        matches!(self, SalesOrderStatus::Created)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            SalesOrderStatus::Created
                | SalesOrderStatus::Reserved
                | SalesOrderStatus::PartialReserved
        )
    }

    pub fn can_ship(&self) -> bool {
        matches!(self, SalesOrderStatus::Reserved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SalesOrderStatus::Delivered | SalesOrderStatus::Canceled)
    }
}

impl fmt::Display for SalesOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SalesOrderStatus::Created => write!(f, "CREATED"),
            SalesOrderStatus::Reserved => write!(f, "RESERVED"),
            SalesOrderStatus::PartialReserved => write!(f, "PARTIAL_RESERVED"),
            SalesOrderStatus::Shipped => write!(f, "SHIPPED"),
            SalesOrderStatus::Delivered => write!(f, "DELIVERED"),
            SalesOrderStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,

    /// Warehouse the order reserves against; reservation and shipping
    /// require it to be set.
    pub warehouse_id: Option<Uuid>,

    pub status: SalesOrderStatus,
    pub created_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sales_order_line::Entity")]
    Lines,
    #[sea_orm(has_many = "super::shipment::Entity")]
    Shipments,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
}

impl Related<super::sales_order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<super::shipment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shipments.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
