//! Quantity ledger for production lines.
//!
//! The five counters (achieved/rejected/recycled/packed/dispatched) live on
//! the `production_lines` row and are mutated exclusively through [`apply`].
//! Every call re-reads the row, validates the would-be result against the
//! conservation invariants, and commits all deltas in one version-guarded
//! UPDATE. Either every delta lands or none does.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::entities::production_line::{self, Entity as ProductionLine};
use crate::errors::ServiceError;

/// Signed deltas to apply to a line's counters in one atomic step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerDelta {
    pub achieved: i32,
    pub rejected: i32,
    pub recycled: i32,
    pub packed: i32,
    pub dispatched: i32,
}

/// Counter state of a line immediately after an [`apply`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LineSnapshot {
    pub line_id: Uuid,
    pub planned: i32,
    pub achieved: i32,
    pub rejected: i32,
    pub recycled: i32,
    pub packed: i32,
    pub dispatched: i32,
}

impl LineSnapshot {
    /// Quantity still available for packing.
    pub fn packable(&self) -> i32 {
        self.achieved - self.packed
    }

    /// Quantity currently packed but not yet dispatched.
    pub fn in_stock(&self) -> i32 {
        self.packed - self.dispatched
    }

    pub fn fully_dispatched(&self) -> bool {
        self.dispatched >= self.planned
    }
}

impl From<&production_line::Model> for LineSnapshot {
    fn from(line: &production_line::Model) -> Self {
        Self {
            line_id: line.id,
            planned: line.planned_quantity,
            achieved: line.achieved_quantity,
            rejected: line.rejected_quantity,
            recycled: line.recycled_quantity,
            packed: line.packed_quantity,
            dispatched: line.dispatched_quantity,
        }
    }
}

/// Validates a delta against the current row and returns the resulting
/// snapshot without touching storage.
fn checked(line: &production_line::Model, delta: LedgerDelta) -> Result<LineSnapshot, ServiceError> {
    let violation = |detail: String| ServiceError::InvariantViolation {
        line_id: line.id,
        detail,
    };

    let achieved = line.achieved_quantity + delta.achieved;
    let rejected = line.rejected_quantity + delta.rejected;
    let recycled = line.recycled_quantity + delta.recycled;
    let packed = line.packed_quantity + delta.packed;
    let dispatched = line.dispatched_quantity + delta.dispatched;

    for (name, value) in [
        ("achieved", achieved),
        ("rejected", rejected),
        ("recycled", recycled),
        ("packed", packed),
        ("dispatched", dispatched),
    ] {
        if value < 0 {
            return Err(violation(format!("{} would drop to {}", name, value)));
        }
    }

    if dispatched > packed {
        return Err(violation(format!(
            "dispatched {} would exceed packed {}",
            dispatched, packed
        )));
    }
    if packed > achieved {
        return Err(violation(format!(
            "packed {} would exceed achieved {}",
            packed, achieved
        )));
    }
    // The running rejection total may never exceed the running total ever
    // achieved (achieved + rejected is conserved across QC moves).
    if rejected > line.achieved_quantity + line.rejected_quantity {
        return Err(violation(format!(
            "rejected {} would exceed total ever achieved {}",
            rejected,
            line.achieved_quantity + line.rejected_quantity
        )));
    }

    Ok(LineSnapshot {
        line_id: line.id,
        planned: line.planned_quantity,
        achieved,
        rejected,
        recycled,
        packed,
        dispatched,
    })
}

/// Applies all deltas to the line in a single atomic, version-guarded UPDATE.
///
/// Fails with `InvariantViolation` when the result would break counter
/// ordering or negativity, and with `ConcurrencyConflict` when the row
/// changed under us (callers retry the whole operation, not this call).
pub async fn apply<C: ConnectionTrait>(
    conn: &C,
    line_id: Uuid,
    delta: LedgerDelta,
) -> Result<LineSnapshot, ServiceError> {
    let line = ProductionLine::find_by_id(line_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Production line {} not found", line_id)))?;

    let snapshot = checked(&line, delta)?;

    let result = ProductionLine::update_many()
        .col_expr(
            production_line::Column::AchievedQuantity,
            Expr::value(snapshot.achieved),
        )
        .col_expr(
            production_line::Column::RejectedQuantity,
            Expr::value(snapshot.rejected),
        )
        .col_expr(
            production_line::Column::RecycledQuantity,
            Expr::value(snapshot.recycled),
        )
        .col_expr(
            production_line::Column::PackedQuantity,
            Expr::value(snapshot.packed),
        )
        .col_expr(
            production_line::Column::DispatchedQuantity,
            Expr::value(snapshot.dispatched),
        )
        .col_expr(
            production_line::Column::Version,
            Expr::value(line.version + 1),
        )
        .col_expr(production_line::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(production_line::Column::Id.eq(line_id))
        .filter(production_line::Column::Version.eq(line.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrencyConflict {
            entity: "production_line",
            id: line_id.to_string(),
        });
    }

    debug!(
        line_id = %line_id,
        achieved = snapshot.achieved,
        rejected = snapshot.rejected,
        packed = snapshot.packed,
        dispatched = snapshot.dispatched,
        "ledger applied"
    );

    Ok(snapshot)
}
