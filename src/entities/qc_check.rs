use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable audit entry for one physical inspection event.
///
/// Repeated identical submissions accumulate by design; each row is a new
/// inspection, not a correction of the last.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "qc_checks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub production_line_id: Uuid,
    /// Daily record the inspection was logged against, when one was active.
    pub record_id: Option<Uuid>,
    pub rejected_delta: i32,
    pub recycled_delta: i32,
    pub remarks: Option<String>,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
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

impl ActiveModelBehavior for ActiveModel {}
