use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One planned quantity of a specific shape or precast product within a job
/// order. Carries the five-counter quantity ledger; every counter mutation
/// goes through `crate::ledger::apply`, never through ad-hoc updates.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub job_order_id: Uuid,
    pub product_id: Uuid,
    /// Shape code (rebar) or product code (precast); group-key component.
    pub product_code: String,
    /// Bar mark for rebar lines; precast lines leave this unset.
    pub bar_mark: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub unit_weight_kg: Option<Decimal>,
    pub planned_quantity: i32,
    pub achieved_quantity: i32,
    pub rejected_quantity: i32,
    pub recycled_quantity: i32,
    pub packed_quantity: i32,
    pub dispatched_quantity: i32,
    /// Optimistic concurrency guard; bumped on every ledger mutation.
    pub version: i32,
    /// Set once planned quantity is fully dispatched. Lines are never deleted.
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::daily_production::Entity")]
    DailyProduction,
    #[sea_orm(has_many = "super::packing_bundle::Entity")]
    PackingBundles,
    #[sea_orm(has_many = "super::qc_check::Entity")]
    QcChecks,
}

impl Related<super::daily_production::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DailyProduction.def()
    }
}

impl Related<super::packing_bundle::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PackingBundles.def()
    }
}

impl Related<super::qc_check::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QcChecks.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr> {
        let mut active = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active.id {
                active.id = Set(Uuid::new_v4());
            }
            active.created_at = Set(now);
        }
        active.updated_at = Set(now);

        Ok(active)
    }
}
