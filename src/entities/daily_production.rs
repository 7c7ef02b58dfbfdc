use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a daily production record.
///
/// `Approved` and `Rejected` are terminal; at most one non-terminal record
/// exists per production line at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionStatus {
    Pending,
    InProgress,
    Paused,
    PendingQc,
    Approved,
    Rejected,
}

impl ProductionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::Pending => "pending",
            ProductionStatus::InProgress => "in_progress",
            ProductionStatus::Paused => "paused",
            ProductionStatus::PendingQc => "pending_qc",
            ProductionStatus::Approved => "approved",
            ProductionStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProductionStatus::Pending),
            "in_progress" => Some(ProductionStatus::InProgress),
            "paused" => Some(ProductionStatus::Paused),
            "pending_qc" => Some(ProductionStatus::PendingQc),
            "approved" => Some(ProductionStatus::Approved),
            "rejected" => Some(ProductionStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProductionStatus::Approved | ProductionStatus::Rejected)
    }
}

/// A machine-downtime interval captured between pause and resume/stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowntimeEntry {
    pub reason: Option<String>,
    pub from: DateTime<Utc>,
    /// Unset while the pause is still open.
    pub to: Option<DateTime<Utc>>,
}

/// The work session for one production line.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "daily_production_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub production_line_id: Uuid,
    /// Stored as string; convert via `ProductionStatus`.
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Json array of `DowntimeEntry`.
    pub downtime: Json,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn status_enum(&self) -> Option<ProductionStatus> {
        ProductionStatus::from_str(&self.status)
    }

    pub fn downtime_entries(&self) -> Vec<DowntimeEntry> {
        serde_json::from_value(self.downtime.clone()).unwrap_or_default()
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
    #[sea_orm(has_many = "super::production_log::Entity")]
    Logs,
}

impl Related<super::production_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionLine.def()
    }
}

impl Related<super::production_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Logs.def()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            ProductionStatus::Pending,
            ProductionStatus::InProgress,
            ProductionStatus::Paused,
            ProductionStatus::PendingQc,
            ProductionStatus::Approved,
            ProductionStatus::Rejected,
        ] {
            assert_eq!(ProductionStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ProductionStatus::from_str("halted"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ProductionStatus::Approved.is_terminal());
        assert!(ProductionStatus::Rejected.is_terminal());
        assert!(!ProductionStatus::PendingQc.is_terminal());
    }
}
