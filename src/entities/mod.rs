pub mod daily_production;
pub mod dispatch_line_item;
pub mod dispatch_record;
pub mod packing_bundle;
pub mod production_line;
pub mod production_log;
pub mod qc_check;

pub use daily_production::{DowntimeEntry, ProductionStatus};
pub use packing_bundle::BundleStage;
pub use production_log::LogAction;
