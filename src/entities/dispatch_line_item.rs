use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One satisfied group key within a dispatch: the quantity actually shipped
/// and the bundles the allocation consumed from. Requested-but-skipped keys
/// get no line item; callers compare against their request to detect partial
/// fulfillment.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dispatch_line_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub dispatch_id: Uuid,
    /// Normalized bar mark; unset for the empty-mark group.
    pub bar_mark: Option<String>,
    pub product_code: String,
    pub quantity: i32,
    /// Json array of bundle ids, oldest consumed first.
    pub bundle_ids: Json,
}

impl Model {
    pub fn bundle_id_list(&self) -> Vec<i64> {
        serde_json::from_value(self.bundle_ids.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::dispatch_record::Entity",
        from = "Column::DispatchId",
        to = "super::dispatch_record::Column::Id"
    )]
    Dispatch,
}

impl Related<super::dispatch_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Dispatch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
