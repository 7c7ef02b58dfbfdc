use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage of a packing bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStage {
    Packed,
    Dispatched,
    Delivered,
}

impl BundleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStage::Packed => "packed",
            BundleStage::Dispatched => "dispatched",
            BundleStage::Delivered => "delivered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "packed" => Some(BundleStage::Packed),
            "dispatched" => Some(BundleStage::Dispatched),
            "delivered" => Some(BundleStage::Delivered),
            _ => None,
        }
    }
}

/// A physical, QR-tagged unit of packed quantity.
///
/// Bundles are created by the packer and never deleted. Dispatch shrinks a
/// partially consumed bundle in place so its QR code keeps referring to what
/// is left of the pack; a drained bundle flips to `dispatched`.
///
/// The i64 primary key doubles as the FIFO tie-break: bundles sharing a
/// `created_at` are consumed in insertion order.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "packing_bundles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub production_line_id: Uuid,
    /// Denormalized from the line at pack time for group-key matching.
    pub product_code: String,
    pub bar_mark: Option<String>,
    pub quantity: i32,
    /// Nominal size requested at pack time; the last bundle of a split may
    /// hold more (remainder absorption).
    pub bundle_size: i32,
    pub stage: String,
    #[sea_orm(unique)]
    pub qr_code: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub total_weight_kg: Option<Decimal>,
    /// Optimistic concurrency guard; bumped on every quantity/stage change.
    pub version: i32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn stage_enum(&self) -> Option<BundleStage> {
        BundleStage::from_str(&self.stage)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::production_line::Entity",
        from = "Column::ProductionLineId",
        to = "super::production_line::Column::Id"
    )]
    ProductionLine,
}

impl Related<super::production_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionLine.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr> {
        let mut active = self;
        let now = Utc::now();

        if insert {
            active.created_at = Set(now);
        }
        active.updated_at = Set(now);

        Ok(active)
    }
}
