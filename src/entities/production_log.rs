use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actions recorded in the production audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogAction {
    Start,
    Pause,
    Resume,
    Stop,
    QuantityUpdate,
    QcCheck,
    Review,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Start => "start",
            LogAction::Pause => "pause",
            LogAction::Resume => "resume",
            LogAction::Stop => "stop",
            LogAction::QuantityUpdate => "quantity_update",
            LogAction::QcCheck => "qc_check",
            LogAction::Review => "review",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(LogAction::Start),
            "pause" => Some(LogAction::Pause),
            "resume" => Some(LogAction::Resume),
            "stop" => Some(LogAction::Stop),
            "quantity_update" => Some(LogAction::QuantityUpdate),
            "qc_check" => Some(LogAction::QcCheck),
            "review" => Some(LogAction::Review),
            _ => None,
        }
    }
}

/// Append-only audit entry for a daily production record. Rows are inserted
/// in the same transaction as the status or counter change they describe and
/// are never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub record_id: Uuid,
    pub action: String,
    pub quantity_delta: Option<i32>,
    pub description: Option<String>,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::daily_production::Entity",
        from = "Column::RecordId",
        to = "super::daily_production::Column::Id"
    )]
    Record,
}

impl Related<super::daily_production::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Record.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
