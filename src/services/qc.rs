use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::daily_production;
use crate::entities::production_line;
use crate::entities::production_log::LogAction;
use crate::entities::qc_check;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::ledger::{self, LedgerDelta};

use super::{production::append_log, with_conflict_retry};

/// Converts rejection reports into ledger moves plus an immutable audit row.
#[derive(Clone)]
pub struct QcService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    retry_attempts: u32,
}

impl QcService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, retry_attempts: u32) -> Self {
        Self {
            db,
            event_sender,
            retry_attempts,
        }
    }

    /// Records one physical inspection: moves `rejected_delta` pieces from
    /// achieved to rejected (and `recycled_delta` of those into recycled),
    /// persists the QC check row, and logs against the line's current record.
    ///
    /// Deliberately not idempotent: every call is a new inspection event.
    #[instrument(skip(self, user))]
    pub async fn record_rejection(
        &self,
        line_id: Uuid,
        rejected_delta: i32,
        recycled_delta: i32,
        remarks: Option<String>,
        user: &str,
    ) -> Result<qc_check::Model, ServiceError> {
        if rejected_delta <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Rejected quantity must be positive, got {}",
                rejected_delta
            )));
        }
        if recycled_delta < 0 || recycled_delta > rejected_delta {
            return Err(ServiceError::ValidationError(format!(
                "Recycled quantity {} must be between 0 and the rejected quantity {}",
                recycled_delta, rejected_delta
            )));
        }

        let check = with_conflict_retry("record_rejection", self.retry_attempts, || {
            self.try_record_rejection(line_id, rejected_delta, recycled_delta, &remarks, user)
        })
        .await?;

        info!(
            line_id = %line_id,
            rejected_delta,
            recycled_delta,
            "QC rejection recorded"
        );
        self.event_sender
            .send_or_log(Event::QcRecorded {
                line_id,
                qc_check_id: check.id,
                rejected_delta,
                recycled_delta,
            })
            .await;

        Ok(check)
    }

    async fn try_record_rejection(
        &self,
        line_id: Uuid,
        rejected_delta: i32,
        recycled_delta: i32,
        remarks: &Option<String>,
        user: &str,
    ) -> Result<qc_check::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let line = production_line::Entity::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production line {} not found", line_id))
            })?;

        // The binding guard: cannot reject more than is currently achieved.
        if line.achieved_quantity - rejected_delta < 0 {
            return Err(ServiceError::InvalidQuantity {
                line_id,
                rejected_delta,
                achieved: line.achieved_quantity,
            });
        }

        ledger::apply(
            &txn,
            line_id,
            LedgerDelta {
                achieved: -rejected_delta,
                rejected: rejected_delta,
                recycled: recycled_delta,
                ..Default::default()
            },
        )
        .await?;

        // Log against the line's most recent session when one exists.
        let record = daily_production::Entity::find()
            .filter(daily_production::Column::ProductionLineId.eq(line_id))
            .order_by_desc(daily_production::Column::CreatedAt)
            .one(&txn)
            .await?;

        let check = qc_check::ActiveModel {
            production_line_id: Set(line_id),
            record_id: Set(record.as_ref().map(|r| r.id)),
            rejected_delta: Set(rejected_delta),
            recycled_delta: Set(recycled_delta),
            remarks: Set(remarks.clone()),
            recorded_by: Set(user.to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let check = check.insert(&txn).await?;

        if let Some(record) = record {
            let note = format!("rejected {}, recycled {}", rejected_delta, recycled_delta);
            append_log(
                &txn,
                record.id,
                LogAction::QcCheck,
                Some(-rejected_delta),
                Some(note),
                user,
            )
            .await?;
        }

        txn.commit().await?;
        Ok(check)
    }

    pub async fn list_checks(&self, line_id: Uuid) -> Result<Vec<qc_check::Model>, ServiceError> {
        let checks = qc_check::Entity::find()
            .filter(qc_check::Column::ProductionLineId.eq(line_id))
            .order_by_asc(qc_check::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(checks)
    }
}
