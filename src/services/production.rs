use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::daily_production::{self, DowntimeEntry, ProductionStatus};
use crate::entities::production_line;
use crate::entities::production_log::{self, LogAction};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::ledger::{self, LedgerDelta};

use super::with_conflict_retry;

/// Input for registering a confirmed job-order line.
#[derive(Debug, Clone)]
pub struct NewProductionLine {
    pub job_order_id: Uuid,
    pub product_id: Uuid,
    pub product_code: String,
    pub bar_mark: Option<String>,
    pub unit_weight_kg: Option<rust_decimal::Decimal>,
    pub planned_quantity: i32,
}

/// State machine over daily production records.
///
/// Transitions: pending -> in_progress <-> paused -> pending_qc ->
/// approved | rejected. Every transition appends an audit log entry in the
/// same transaction as the status change.
#[derive(Clone)]
pub struct ProductionService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    retry_attempts: u32,
}

impl ProductionService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, retry_attempts: u32) -> Self {
        Self {
            db,
            event_sender,
            retry_attempts,
        }
    }

    /// Registers a confirmed job-order line. Counters start at zero; the
    /// surrounding system calls this when a job order is confirmed.
    #[instrument(skip(self, line))]
    pub async fn register_line(
        &self,
        line: NewProductionLine,
    ) -> Result<production_line::Model, ServiceError> {
        if line.planned_quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Planned quantity must not be negative, got {}",
                line.planned_quantity
            )));
        }
        if line.product_code.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Product code must not be empty".to_string(),
            ));
        }

        let model = production_line::ActiveModel {
            job_order_id: Set(line.job_order_id),
            product_id: Set(line.product_id),
            product_code: Set(line.product_code),
            bar_mark: Set(line.bar_mark),
            unit_weight_kg: Set(line.unit_weight_kg),
            planned_quantity: Set(line.planned_quantity),
            achieved_quantity: Set(0),
            rejected_quantity: Set(0),
            recycled_quantity: Set(0),
            packed_quantity: Set(0),
            dispatched_quantity: Set(0),
            version: Set(1),
            closed_at: Set(None),
            ..Default::default()
        };
        let created = model.insert(&*self.db).await?;
        Ok(created)
    }

    pub async fn line_snapshot(
        &self,
        line_id: Uuid,
    ) -> Result<production_line::Model, ServiceError> {
        production_line::Entity::find_by_id(line_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production line {} not found", line_id))
            })
    }

    /// Opens a new pending record for the line. At most one non-terminal
    /// record may exist per line.
    #[instrument(skip(self, user))]
    pub async fn create_record(
        &self,
        line_id: Uuid,
        user: &str,
    ) -> Result<daily_production::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        production_line::Entity::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production line {} not found", line_id))
            })?;

        let open = daily_production::Entity::find()
            .filter(daily_production::Column::ProductionLineId.eq(line_id))
            .filter(
                daily_production::Column::Status
                    .is_not_in([
                        ProductionStatus::Approved.as_str(),
                        ProductionStatus::Rejected.as_str(),
                    ]),
            )
            .one(&txn)
            .await?;

        if let Some(existing) = open {
            return Err(ServiceError::Conflict(format!(
                "Line {} already has an active production record {} ({})",
                line_id, existing.id, existing.status
            )));
        }

        let record = daily_production::ActiveModel {
            production_line_id: Set(line_id),
            status: Set(ProductionStatus::Pending.as_str().to_string()),
            started_at: Set(None),
            stopped_at: Set(None),
            downtime: Set(serde_json::json!([])),
            created_by: Set(user.to_string()),
            ..Default::default()
        };
        let created = record.insert(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductionRecordCreated {
                record_id: created.id,
                line_id,
            })
            .await;

        Ok(created)
    }

    /// Pending -> InProgress. Requires no prior start.
    #[instrument(skip(self, user))]
    pub async fn start(
        &self,
        record_id: Uuid,
        user: &str,
    ) -> Result<daily_production::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let record = load_record(&txn, record_id).await?;
        let status = status_of(&record)?;

        if status != ProductionStatus::Pending || record.started_at.is_some() {
            return Err(invalid_transition(&record, "start"));
        }

        let mut active: daily_production::ActiveModel = record.clone().into();
        active.status = Set(ProductionStatus::InProgress.as_str().to_string());
        active.started_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        append_log(&txn, record_id, LogAction::Start, None, None, user).await?;
        txn.commit().await?;

        info!(record_id = %record_id, "production started");
        self.event_sender
            .send_or_log(Event::ProductionStarted {
                record_id,
                line_id: record.production_line_id,
            })
            .await;

        Ok(updated)
    }

    /// InProgress -> Paused. Opens a downtime interval.
    #[instrument(skip(self, user))]
    pub async fn pause(
        &self,
        record_id: Uuid,
        reason: Option<String>,
        user: &str,
    ) -> Result<daily_production::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let record = load_record(&txn, record_id).await?;
        if status_of(&record)? != ProductionStatus::InProgress {
            return Err(invalid_transition(&record, "pause"));
        }

        let mut downtime = record.downtime_entries();
        downtime.push(DowntimeEntry {
            reason: reason.clone(),
            from: Utc::now(),
            to: None,
        });

        let mut active: daily_production::ActiveModel = record.clone().into();
        active.status = Set(ProductionStatus::Paused.as_str().to_string());
        active.downtime = Set(downtime_json(&downtime)?);
        let updated = active.update(&txn).await?;

        append_log(
            &txn,
            record_id,
            LogAction::Pause,
            None,
            reason.clone(),
            user,
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductionPaused {
                record_id,
                line_id: record.production_line_id,
                reason,
            })
            .await;

        Ok(updated)
    }

    /// Paused -> InProgress. Fails once the record has been stopped.
    #[instrument(skip(self, user))]
    pub async fn resume(
        &self,
        record_id: Uuid,
        user: &str,
    ) -> Result<daily_production::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let record = load_record(&txn, record_id).await?;
        if status_of(&record)? != ProductionStatus::Paused || record.stopped_at.is_some() {
            return Err(invalid_transition(&record, "resume"));
        }

        let mut downtime = record.downtime_entries();
        close_open_downtime(&mut downtime);

        let mut active: daily_production::ActiveModel = record.clone().into();
        active.status = Set(ProductionStatus::InProgress.as_str().to_string());
        active.downtime = Set(downtime_json(&downtime)?);
        let updated = active.update(&txn).await?;

        append_log(&txn, record_id, LogAction::Resume, None, None, user).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductionResumed {
                record_id,
                line_id: record.production_line_id,
            })
            .await;

        Ok(updated)
    }

    /// InProgress | Paused -> PendingQc. Stamps `stopped_at` and closes any
    /// open downtime interval.
    #[instrument(skip(self, user))]
    pub async fn stop(
        &self,
        record_id: Uuid,
        user: &str,
    ) -> Result<daily_production::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let record = load_record(&txn, record_id).await?;
        let status = status_of(&record)?;
        if !matches!(
            status,
            ProductionStatus::InProgress | ProductionStatus::Paused
        ) {
            return Err(invalid_transition(&record, "stop"));
        }

        let mut downtime = record.downtime_entries();
        close_open_downtime(&mut downtime);

        let mut active: daily_production::ActiveModel = record.clone().into();
        active.status = Set(ProductionStatus::PendingQc.as_str().to_string());
        active.stopped_at = Set(Some(Utc::now()));
        active.downtime = Set(downtime_json(&downtime)?);
        let updated = active.update(&txn).await?;

        append_log(&txn, record_id, LogAction::Stop, None, None, user).await?;
        txn.commit().await?;

        info!(record_id = %record_id, "production stopped, awaiting QC");
        self.event_sender
            .send_or_log(Event::ProductionStopped {
                record_id,
                line_id: record.production_line_id,
            })
            .await;

        Ok(updated)
    }

    /// Increments the line's achieved quantity. Only legal while the session
    /// is running (started and not yet stopped); the new total is capped at
    /// the planned quantity.
    #[instrument(skip(self, user))]
    pub async fn update_quantity(
        &self,
        record_id: Uuid,
        delta: i32,
        user: &str,
    ) -> Result<crate::ledger::LineSnapshot, ServiceError> {
        if delta <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity delta must be positive, got {}",
                delta
            )));
        }

        let outcome = with_conflict_retry("update_quantity", self.retry_attempts, || {
            self.try_update_quantity(record_id, delta, user)
        })
        .await?;

        self.event_sender
            .send_or_log(Event::QuantityUpdated {
                record_id,
                line_id: outcome.line_id,
                delta,
                achieved: outcome.achieved,
            })
            .await;

        Ok(outcome)
    }

    async fn try_update_quantity(
        &self,
        record_id: Uuid,
        delta: i32,
        user: &str,
    ) -> Result<crate::ledger::LineSnapshot, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let record = load_record(&txn, record_id).await?;
        if record.started_at.is_none() || record.stopped_at.is_some() {
            return Err(invalid_transition(&record, "update_quantity"));
        }

        let line_id = record.production_line_id;
        let line = production_line::Entity::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production line {} not found", line_id))
            })?;

        if line.achieved_quantity + delta > line.planned_quantity {
            return Err(ServiceError::QuantityExceeded {
                line_id,
                planned: line.planned_quantity,
                achieved: line.achieved_quantity,
                delta,
            });
        }

        let snapshot = ledger::apply(
            &txn,
            line_id,
            LedgerDelta {
                achieved: delta,
                ..Default::default()
            },
        )
        .await?;

        // Re-check on the row the ledger actually updated; a racing update
        // inside the window rolls the transaction back here.
        if snapshot.achieved > snapshot.planned {
            return Err(ServiceError::QuantityExceeded {
                line_id,
                planned: snapshot.planned,
                achieved: snapshot.achieved - delta,
                delta,
            });
        }

        append_log(
            &txn,
            record_id,
            LogAction::QuantityUpdate,
            Some(delta),
            None,
            user,
        )
        .await?;
        txn.commit().await?;

        Ok(snapshot)
    }

    /// PendingQc -> Approved | Rejected (terminal QC sign-off).
    #[instrument(skip(self, user))]
    pub async fn review(
        &self,
        record_id: Uuid,
        approved: bool,
        remarks: Option<String>,
        user: &str,
    ) -> Result<daily_production::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let record = load_record(&txn, record_id).await?;
        if status_of(&record)? != ProductionStatus::PendingQc {
            return Err(invalid_transition(&record, "review"));
        }

        let verdict = if approved {
            ProductionStatus::Approved
        } else {
            ProductionStatus::Rejected
        };

        let mut active: daily_production::ActiveModel = record.clone().into();
        active.status = Set(verdict.as_str().to_string());
        let updated = active.update(&txn).await?;

        append_log(&txn, record_id, LogAction::Review, None, remarks, user).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductionReviewed {
                record_id,
                line_id: record.production_line_id,
                approved,
            })
            .await;

        Ok(updated)
    }

    pub async fn get_record(
        &self,
        record_id: Uuid,
    ) -> Result<daily_production::Model, ServiceError> {
        load_record(&*self.db, record_id).await
    }

    pub async fn list_logs(
        &self,
        record_id: Uuid,
    ) -> Result<Vec<production_log::Model>, ServiceError> {
        let logs = production_log::Entity::find()
            .filter(production_log::Column::RecordId.eq(record_id))
            .order_by_asc(production_log::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(logs)
    }
}

async fn load_record<C: ConnectionTrait>(
    conn: &C,
    record_id: Uuid,
) -> Result<daily_production::Model, ServiceError> {
    daily_production::Entity::find_by_id(record_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Production record {} not found", record_id)))
}

fn status_of(record: &daily_production::Model) -> Result<ProductionStatus, ServiceError> {
    record.status_enum().ok_or_else(|| {
        ServiceError::InternalError(format!(
            "Record {} carries unknown status {:?}",
            record.id, record.status
        ))
    })
}

fn invalid_transition(record: &daily_production::Model, action: &str) -> ServiceError {
    ServiceError::InvalidTransition {
        record_id: record.id,
        action: action.to_string(),
        status: record.status.clone(),
    }
}

fn downtime_json(entries: &[DowntimeEntry]) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(entries)
        .map_err(|e| ServiceError::InternalError(format!("downtime serialization: {}", e)))
}

fn close_open_downtime(entries: &mut [DowntimeEntry]) {
    if let Some(open) = entries.iter_mut().rev().find(|e| e.to.is_none()) {
        open.to = Some(Utc::now());
    }
}

/// Appends an audit entry; called inside the transaction that carries the
/// status or counter change it describes.
pub(crate) async fn append_log<C: ConnectionTrait>(
    conn: &C,
    record_id: Uuid,
    action: LogAction,
    quantity_delta: Option<i32>,
    description: Option<String>,
    user: &str,
) -> Result<(), ServiceError> {
    let entry = production_log::ActiveModel {
        record_id: Set(record_id),
        action: Set(action.as_str().to_string()),
        quantity_delta: Set(quantity_delta),
        description: Set(description),
        recorded_by: Set(user.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    entry.insert(conn).await?;
    Ok(())
}
