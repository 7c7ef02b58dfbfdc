use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::packing_bundle::{self, BundleStage};
use crate::entities::production_line;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::ledger::{self, LedgerDelta};

use super::with_conflict_retry;

/// Splits a requested quantity into bundle sizes.
///
/// All bundles carry the nominal size except the last, which absorbs the
/// remainder: splitting 12 at size 5 yields [5, 7], not [5, 5, 2]. A request
/// below the nominal size yields one undersized bundle.
pub fn plan_bundles(requested: i32, bundle_size: i32) -> Vec<i32> {
    let count = (requested / bundle_size).max(1);
    let mut sizes = vec![bundle_size; (count - 1) as usize];
    sizes.push(requested - bundle_size * (count - 1));
    sizes
}

fn mint_qr_code() -> String {
    format!("PKB-{}", Uuid::new_v4().simple())
}

/// Creates QR-tagged packing bundles out of achieved quantity.
#[derive(Clone)]
pub struct PackingService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    retry_attempts: u32,
}

impl PackingService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, retry_attempts: u32) -> Self {
        Self {
            db,
            event_sender,
            retry_attempts,
        }
    }

    /// Packs `requested` pieces of the line into bundles of nominal
    /// `bundle_size`, atomically with the ledger's packed increment.
    #[instrument(skip(self, user))]
    pub async fn pack(
        &self,
        line_id: Uuid,
        requested: i32,
        bundle_size: i32,
        user: &str,
    ) -> Result<Vec<packing_bundle::Model>, ServiceError> {
        if requested <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Pack quantity must be positive, got {}",
                requested
            )));
        }
        if bundle_size <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Bundle size must be positive, got {}",
                bundle_size
            )));
        }

        let bundles = with_conflict_retry("pack", self.retry_attempts, || {
            self.try_pack(line_id, requested, bundle_size, user)
        })
        .await?;

        info!(
            line_id = %line_id,
            requested,
            bundles = bundles.len(),
            "quantity packed"
        );
        self.event_sender
            .send_or_log(Event::BundlesPacked {
                line_id,
                bundle_ids: bundles.iter().map(|b| b.id).collect(),
                quantity: requested,
            })
            .await;

        Ok(bundles)
    }

    async fn try_pack(
        &self,
        line_id: Uuid,
        requested: i32,
        bundle_size: i32,
        user: &str,
    ) -> Result<Vec<packing_bundle::Model>, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let line = production_line::Entity::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production line {} not found", line_id))
            })?;

        let available = line.achieved_quantity - line.packed_quantity;
        if requested > available {
            return Err(ServiceError::InsufficientAchievedQuantity {
                line_id,
                requested,
                available,
            });
        }

        let plan = plan_bundles(requested, bundle_size);

        // Postcondition of the split: checked before anything is persisted.
        let planned_total: i32 = plan.iter().sum();
        if planned_total != requested {
            return Err(ServiceError::InternalError(format!(
                "Bundle split of {} produced {}",
                requested, planned_total
            )));
        }

        let mut bundles = Vec::with_capacity(plan.len());
        for quantity in plan {
            let bundle = packing_bundle::ActiveModel {
                production_line_id: Set(line_id),
                product_code: Set(line.product_code.clone()),
                bar_mark: Set(line.bar_mark.clone()),
                quantity: Set(quantity),
                bundle_size: Set(bundle_size),
                stage: Set(BundleStage::Packed.as_str().to_string()),
                qr_code: Set(mint_qr_code()),
                total_weight_kg: Set(line
                    .unit_weight_kg
                    .map(|w| w * Decimal::from(quantity))),
                version: Set(1),
                created_by: Set(user.to_string()),
                ..Default::default()
            };
            bundles.push(bundle.insert(&txn).await?);
        }

        ledger::apply(
            &txn,
            line_id,
            LedgerDelta {
                packed: requested,
                ..Default::default()
            },
        )
        .await?;

        txn.commit().await?;
        Ok(bundles)
    }

    /// Lists a line's bundles, optionally filtered by stage, in FIFO order.
    pub async fn list_bundles(
        &self,
        line_id: Uuid,
        stage: Option<BundleStage>,
    ) -> Result<Vec<packing_bundle::Model>, ServiceError> {
        let mut query = packing_bundle::Entity::find()
            .filter(packing_bundle::Column::ProductionLineId.eq(line_id));
        if let Some(stage) = stage {
            query = query.filter(packing_bundle::Column::Stage.eq(stage.as_str()));
        }
        let bundles = query
            .order_by_asc(packing_bundle::Column::CreatedAt)
            .order_by_asc(packing_bundle::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(bundles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_splits_evenly() {
        assert_eq!(plan_bundles(10, 5), vec![5, 5]);
    }

    #[test]
    fn remainder_goes_to_last_bundle() {
        assert_eq!(plan_bundles(12, 5), vec![5, 7]);
        assert_eq!(plan_bundles(7, 5), vec![7]);
    }

    #[test]
    fn request_below_bundle_size_is_one_bundle() {
        assert_eq!(plan_bundles(3, 5), vec![3]);
    }

    #[test]
    fn split_always_sums_to_request() {
        for requested in 1..=40 {
            for bundle_size in 1..=10 {
                let plan = plan_bundles(requested, bundle_size);
                assert_eq!(plan.iter().sum::<i32>(), requested);
                assert_eq!(plan.len() as i32, (requested / bundle_size).max(1));
            }
        }
    }
}
