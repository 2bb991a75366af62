use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One-time-per-account checkout code, percentage or fixed amount.
/// `is_expired` is sweep-maintained, not computed from the clock on read.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discount_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub description: String,
    pub discount_type: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub min_order_amount: Decimal,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::discount_code_usage::Entity")]
    Usages,
}

impl Related<super::discount_code_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
