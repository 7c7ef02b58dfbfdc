use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::dispatch_line_item;
use crate::entities::dispatch_record;
use crate::entities::packing_bundle::{self, BundleStage};
use crate::entities::production_line;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::ledger::{self, LedgerDelta};

use super::with_conflict_retry;

/// Normalizes a bar mark (or precast variant tag) for group-key matching.
/// Null, empty and whitespace-only marks all collapse to the empty sentinel,
/// so inconsistently tagged bundles unify under one key.
pub fn normalize_mark(mark: Option<&str>) -> String {
    mark.map(|m| m.trim().to_uppercase()).unwrap_or_default()
}

/// Composite allocation key: normalized mark + shape/product code. A struct
/// internally; serialized to `"mark-code"` only at logging boundaries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub mark: String,
    pub product_code: String,
}

impl GroupKey {
    pub fn new(mark: Option<&str>, product_code: &str) -> Self {
        Self {
            mark: normalize_mark(mark),
            product_code: product_code.trim().to_uppercase(),
        }
    }

    pub fn matches_bundle(&self, bundle: &packing_bundle::Model) -> bool {
        normalize_mark(bundle.bar_mark.as_deref()) == self.mark
            && bundle.product_code.trim().to_uppercase() == self.product_code
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.mark, self.product_code)
    }
}

/// One requested group key and quantity.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequestItem {
    pub bar_mark: Option<String>,
    pub product_code: String,
    pub quantity: i32,
}

/// A group key the allocator could not fully satisfy; nothing was deducted
/// for it. Part of the success response so callers can detect partial
/// fulfillment.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedKey {
    pub bar_mark: Option<String>,
    pub product_code: String,
    pub requested: i32,
    pub available: i32,
}

/// Result of a dispatch: the persisted record, its line items (actual
/// quantities), and the keys that were skipped.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub record: dispatch_record::Model,
    pub line_items: Vec<dispatch_line_item::Model>,
    pub skipped: Vec<SkippedKey>,
}

struct Allocation {
    key: GroupKey,
    quantity: i32,
    bundle_ids: Vec<i64>,
}

/// FIFO bundle allocation: consumes the oldest packed bundles per group key,
/// splitting a bundle in place when it only partially satisfies the request.
#[derive(Clone)]
pub struct DispatchService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    retry_attempts: u32,
}

impl DispatchService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, retry_attempts: u32) -> Self {
        Self {
            db,
            event_sender,
            retry_attempts,
        }
    }

    /// Dispatches the requested quantities against packed stock.
    ///
    /// Keys that cannot be fully satisfied are skipped without touching any
    /// bundle; the operation fails with `NothingToDispatch` only when no key
    /// yields any quantity. The whole allocation runs in one transaction and
    /// retries from scratch on a version conflict.
    #[instrument(skip(self, items, user))]
    pub async fn dispatch(
        &self,
        work_order_id: Uuid,
        items: Vec<DispatchRequestItem>,
        user: &str,
    ) -> Result<DispatchOutcome, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Dispatch request has no line items".to_string(),
            ));
        }

        // Merge duplicate keys so the walk sees one request per key.
        let mut requests: BTreeMap<GroupKey, i32> = BTreeMap::new();
        for item in &items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Dispatch quantity for {} must be positive, got {}",
                    item.product_code, item.quantity
                )));
            }
            if item.product_code.trim().is_empty() {
                return Err(ServiceError::ValidationError(
                    "Dispatch item is missing a product code".to_string(),
                ));
            }
            let key = GroupKey::new(item.bar_mark.as_deref(), &item.product_code);
            *requests.entry(key).or_insert(0) += item.quantity;
        }

        let (outcome, closed_lines, total) =
            with_conflict_retry("dispatch", self.retry_attempts, || {
                self.try_dispatch(work_order_id, &requests, user)
            })
            .await?;

        info!(
            dispatch_id = %outcome.record.id,
            work_order_id = %work_order_id,
            total,
            skipped = outcome.skipped.len(),
            "dispatch created"
        );
        self.event_sender
            .send_or_log(Event::DispatchCreated {
                dispatch_id: outcome.record.id,
                work_order_id,
                total_quantity: total,
            })
            .await;
        for line_id in closed_lines {
            self.event_sender
                .send_or_log(Event::LineClosed { line_id })
                .await;
        }

        Ok(outcome)
    }

    async fn try_dispatch(
        &self,
        work_order_id: Uuid,
        requests: &BTreeMap<GroupKey, i32>,
        user: &str,
    ) -> Result<(DispatchOutcome, Vec<Uuid>, i32), ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        // One snapshot of packed stock, already in FIFO order; keys partition
        // it, so per-key filtering never sees a bundle twice.
        let stock = packing_bundle::Entity::find()
            .filter(packing_bundle::Column::Stage.eq(BundleStage::Packed.as_str()))
            .order_by_asc(packing_bundle::Column::CreatedAt)
            .order_by_asc(packing_bundle::Column::Id)
            .all(&txn)
            .await?;

        let mut allocations: Vec<Allocation> = Vec::new();
        let mut skipped: Vec<SkippedKey> = Vec::new();
        let mut line_deductions: BTreeMap<Uuid, i32> = BTreeMap::new();

        for (key, &requested) in requests {
            let candidates: Vec<&packing_bundle::Model> =
                stock.iter().filter(|b| key.matches_bundle(b)).collect();

            let available: i32 = candidates.iter().map(|b| b.quantity).sum();
            if available < requested {
                // No partial dispatch for a key: skip it entirely.
                warn!(
                    key = %key,
                    requested,
                    available,
                    "group key short of stock; skipped"
                );
                skipped.push(SkippedKey {
                    bar_mark: if key.mark.is_empty() {
                        None
                    } else {
                        Some(key.mark.clone())
                    },
                    product_code: key.product_code.clone(),
                    requested,
                    available,
                });
                continue;
            }

            let mut remaining = requested;
            let mut bundle_ids = Vec::new();
            for bundle in candidates {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(bundle.quantity);
                deduct_bundle(&txn, bundle, take).await?;
                remaining -= take;
                bundle_ids.push(bundle.id);
                *line_deductions.entry(bundle.production_line_id).or_insert(0) += take;
            }

            allocations.push(Allocation {
                key: key.clone(),
                quantity: requested,
                bundle_ids,
            });
        }

        if allocations.is_empty() {
            return Err(ServiceError::NothingToDispatch { work_order_id });
        }

        // Move the deducted quantity through each affected line's ledger and
        // soft-close lines that reached their plan. The packed counter is
        // cumulative; what remains in stock is packed - dispatched, and the
        // physical decrement already happened on the bundles.
        let mut closed_lines = Vec::new();
        for (&line_id, &deducted) in &line_deductions {
            let snapshot = ledger::apply(
                &txn,
                line_id,
                LedgerDelta {
                    dispatched: deducted,
                    ..Default::default()
                },
            )
            .await?;

            if snapshot.fully_dispatched() {
                let res = production_line::Entity::update_many()
                    .col_expr(
                        production_line::Column::ClosedAt,
                        Expr::value(Some(Utc::now())),
                    )
                    .filter(production_line::Column::Id.eq(line_id))
                    .filter(production_line::Column::ClosedAt.is_null())
                    .exec(&txn)
                    .await?;
                if res.rows_affected > 0 {
                    closed_lines.push(line_id);
                }
            }
        }

        let record = dispatch_record::ActiveModel {
            work_order_id: Set(work_order_id),
            created_by: Set(user.to_string()),
            delivered_at: Set(None),
            ..Default::default()
        };
        let record = record.insert(&txn).await?;

        let mut line_items = Vec::with_capacity(allocations.len());
        let mut total = 0;
        for alloc in &allocations {
            total += alloc.quantity;
            let item = dispatch_line_item::ActiveModel {
                dispatch_id: Set(record.id),
                bar_mark: Set(if alloc.key.mark.is_empty() {
                    None
                } else {
                    Some(alloc.key.mark.clone())
                }),
                product_code: Set(alloc.key.product_code.clone()),
                quantity: Set(alloc.quantity),
                bundle_ids: Set(serde_json::json!(alloc.bundle_ids)),
                ..Default::default()
            };
            line_items.push(item.insert(&txn).await?);
        }

        txn.commit().await?;

        Ok((
            DispatchOutcome {
                record,
                line_items,
                skipped,
            },
            closed_lines,
            total,
        ))
    }

    /// Confirms delivery: stamps the record and flips its fully consumed
    /// bundles from dispatched to delivered. Bundles that were only partially
    /// consumed stayed packed and remain in stock.
    #[instrument(skip(self, user))]
    pub async fn mark_delivered(
        &self,
        dispatch_id: Uuid,
        user: &str,
    ) -> Result<dispatch_record::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let record = dispatch_record::Entity::find_by_id(dispatch_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Dispatch {} not found", dispatch_id))
            })?;

        if record.delivered_at.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Dispatch {} is already delivered",
                dispatch_id
            )));
        }

        let items = dispatch_line_item::Entity::find()
            .filter(dispatch_line_item::Column::DispatchId.eq(dispatch_id))
            .all(&txn)
            .await?;

        for item in &items {
            for bundle_id in item.bundle_id_list() {
                packing_bundle::Entity::update_many()
                    .col_expr(
                        packing_bundle::Column::Stage,
                        Expr::value(BundleStage::Delivered.as_str()),
                    )
                    .col_expr(packing_bundle::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(packing_bundle::Column::Id.eq(bundle_id))
                    .filter(packing_bundle::Column::Stage.eq(BundleStage::Dispatched.as_str()))
                    .exec(&txn)
                    .await?;
            }
        }

        let mut active: dispatch_record::ActiveModel = record.into();
        active.delivered_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(dispatch_id = %dispatch_id, by = user, "dispatch delivered");
        self.event_sender
            .send_or_log(Event::DispatchDelivered { dispatch_id })
            .await;

        Ok(updated)
    }

    pub async fn get_dispatch(
        &self,
        dispatch_id: Uuid,
    ) -> Result<(dispatch_record::Model, Vec<dispatch_line_item::Model>), ServiceError> {
        let record = dispatch_record::Entity::find_by_id(dispatch_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Dispatch {} not found", dispatch_id))
            })?;
        let items = dispatch_line_item::Entity::find()
            .filter(dispatch_line_item::Column::DispatchId.eq(dispatch_id))
            .order_by_asc(dispatch_line_item::Column::Id)
            .all(&*self.db)
            .await?;
        Ok((record, items))
    }
}

/// Deducts `take` pieces from a bundle, flipping a drained bundle to
/// dispatched. Version-guarded: a concurrent mutation surfaces as
/// `ConcurrencyConflict` and the caller retries the whole allocation.
async fn deduct_bundle<C: ConnectionTrait>(
    conn: &C,
    bundle: &packing_bundle::Model,
    take: i32,
) -> Result<(), ServiceError> {
    let left = bundle.quantity - take;
    let stage = if left == 0 {
        BundleStage::Dispatched
    } else {
        BundleStage::Packed
    };

    let res = packing_bundle::Entity::update_many()
        .col_expr(packing_bundle::Column::Quantity, Expr::value(left))
        .col_expr(packing_bundle::Column::Stage, Expr::value(stage.as_str()))
        .col_expr(
            packing_bundle::Column::Version,
            Expr::value(bundle.version + 1),
        )
        .col_expr(packing_bundle::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(packing_bundle::Column::Id.eq(bundle.id))
        .filter(packing_bundle::Column::Version.eq(bundle.version))
        .exec(conn)
        .await?;

    if res.rows_affected == 0 {
        return Err(ServiceError::ConcurrencyConflict {
            entity: "packing_bundle",
            id: bundle.id.to_string(),
        });
    }

    Ok(())
}
