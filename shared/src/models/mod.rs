//! Domain models for the inventory ledger

mod backfill;
mod ledger;
mod production;
mod recipe;
mod sales;
mod stock_check;
mod unit;

pub use backfill::*;
pub use ledger::*;
pub use production::*;
pub use recipe::*;
pub use sales::*;
pub use stock_check::*;
pub use unit::*;
