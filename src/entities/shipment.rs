use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Shipping carrier enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ShippingCarrier {
    #[sea_orm(string_value = "UPS")]
    Ups,
    #[sea_orm(string_value = "FedEx")]
    FedEx,
    #[sea_orm(string_value = "USPS")]
    Usps,
    #[sea_orm(string_value = "DHL")]
    Dhl,
    #[sea_orm(string_value = "Other")]
    Other,
}

impl fmt::Display for ShippingCarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShippingCarrier::Ups => write!(f, "UPS"),
            ShippingCarrier::FedEx => write!(f, "FedEx"),
            ShippingCarrier::Usps => write!(f, "USPS"),
            ShippingCarrier::Dhl => write!(f, "DHL"),
            ShippingCarrier::Other => write!(f, "Other"),
        }
    }
}

/// Shipment lifecycle: `Planned -> InTransit -> Delivered`. Carrier
/// integrations push `Planned -> InTransit`; delivery confirmation is the
/// only transition with order-side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ShipmentStatus {
    #[sea_orm(string_value = "PLANNED")]
    Planned,
    #[sea_orm(string_value = "IN_TRANSIT")]
    InTransit,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
}

impl ShipmentStatus {
    pub fn can_deliver(&self) -> bool {
        matches!(self, ShipmentStatus::InTransit)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipmentStatus::Planned => write!(f, "PLANNED"),
            ShipmentStatus::InTransit => write!(f, "IN_TRANSIT"),
            ShipmentStatus::Delivered => write!(f, "DELIVERED"),
        }
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLANNED" => Ok(ShipmentStatus::Planned),
            "IN_TRANSIT" => Ok(ShipmentStatus::InTransit),
            "DELIVERED" => Ok(ShipmentStatus::Delivered),
            other => Err(format!("unknown shipment status: {}", other)),
        }
    }
}

/// Shipment entity model, one-to-one with a sales order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub order_id: Uuid,

    pub carrier: ShippingCarrier,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub planned_departure: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sales_order::Entity",
        from = "Column::OrderId",
        to = "super::sales_order::Column::Id"
    )]
    Order,
}

impl Related<super::sales_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
        }

        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }

        Ok(active_model)
    }
}
