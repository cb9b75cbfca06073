use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Immutable stock ledger entry.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    /// Always positive; direction comes from `movement_type`
    pub quantity: f64,
    pub unit_cost: f64,
    pub reference: Option<String>,
    pub manufacturing_order_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum, Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    #[sea_orm(string_value = "in")]
    In,
    #[sea_orm(string_value = "out")]
    Out,
    #[sea_orm(string_value = "production")]
    Production,
    #[sea_orm(string_value = "consumption")]
    Consumption,
}

impl MovementType {
    pub fn is_increase(self) -> bool {
        matches!(self, Self::In | Self::Production)
    }

    /// Signed stock delta for a movement of `quantity` units.
    pub fn signed(self, quantity: f64) -> f64 {
        if self.is_increase() {
            quantity
        } else {
            -quantity
        }
    }
}

impl Model {
    pub fn signed_quantity(&self) -> f64 {
        self.movement_type.signed(self.quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::manufacturing_order::Entity",
        from = "Column::ManufacturingOrderId",
        to = "super::manufacturing_order::Column::Id"
    )]
    ManufacturingOrder,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::manufacturing_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ManufacturingOrder.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            return Err(DbErr::Custom(
                "stock movements are append-only".to_string(),
            ));
        }

        if let ActiveValue::NotSet = self.id {
            self.id = ActiveValue::Set(Uuid::new_v4());
        }
        if let ActiveValue::NotSet = self.created_at {
            self.created_at = ActiveValue::Set(Utc::now());
        }
        if let ActiveValue::NotSet = self.unit_cost {
            self.unit_cost = ActiveValue::Set(0.0);
        }

        Ok(self)
    }
}
