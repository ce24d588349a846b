use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of quantity change recorded by a movement.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    #[sea_orm(string_value = "ADJUSTMENT_IN")]
    AdjustmentIn,
    #[sea_orm(string_value = "ADJUSTMENT_OUT")]
    AdjustmentOut,
    #[sea_orm(string_value = "TRANSFER_IN")]
    TransferIn,
    #[sea_orm(string_value = "TRANSFER_OUT")]
    TransferOut,
    #[sea_orm(string_value = "SALE")]
    Sale,
    #[sea_orm(string_value = "RETURN")]
    Return,
    #[sea_orm(string_value = "DAMAGE")]
    Damage,
    #[sea_orm(string_value = "INITIAL_STOCK")]
    InitialStock,
}

impl MovementType {
    /// True when a movement of this kind adds stock to its location.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            MovementType::AdjustmentIn
                | MovementType::TransferIn
                | MovementType::Return
                | MovementType::InitialStock
        )
    }
}

/// Append-only audit record of one balance change. Rows are never updated
/// or deleted; `new_quantity - previous_quantity` is `+quantity` for inbound
/// kinds and `-quantity` for outbound kinds.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "stock_movements")]
#[schema(as = StockMovement)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Signed change this movement applied to its balance.
    pub fn net_change(&self) -> i32 {
        self.new_quantity - self.previous_quantity
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
        belongs_to = "super::location::Entity",
        from = "Column::LocationId",
        to = "super::location::Column::Id"
    )]
    Location,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            return Err(DbErr::Custom(
                "stock movements are append-only and cannot be updated".to_string(),
            ));
        }
        let mut active_model = self;
        active_model.created_at = Set(Utc::now());
        Ok(active_model)
    }

    async fn before_delete<C>(self, _db: &C) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        Err(DbErr::Custom(
            "stock movements are append-only and cannot be deleted".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn direction_of_each_kind() {
        let inbound = [
            MovementType::AdjustmentIn,
            MovementType::TransferIn,
            MovementType::Return,
            MovementType::InitialStock,
        ];
        for kind in MovementType::iter() {
            assert_eq!(kind.is_inbound(), inbound.contains(&kind), "{kind}");
        }
    }

    #[test]
    fn display_matches_stored_value() {
        assert_eq!(MovementType::TransferOut.to_string(), "TRANSFER_OUT");
        assert_eq!(
            MovementType::from_str("INITIAL_STOCK").unwrap(),
            MovementType::InitialStock
        );
    }
}
