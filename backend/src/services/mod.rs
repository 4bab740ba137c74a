//! Business logic services for the inventory ledger

pub mod backfill;
pub mod cancellation;
pub mod ledger;
pub mod production;
pub mod recipe;
pub mod sales_sync;
pub mod stock_check;
pub mod units;

pub use backfill::{BackfillJob, BackfillService};
pub use cancellation::CancellationFlag;
pub use ledger::LedgerService;
pub use production::ProductionService;
pub use recipe::RecipeService;
pub use sales_sync::SalesSyncService;
pub use stock_check::StockCheckService;
pub use units::UnitService;
