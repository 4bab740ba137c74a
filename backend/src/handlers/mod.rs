//! HTTP request handlers

pub mod health;
pub mod inventory;
pub mod production;
pub mod recipe;
pub mod sales_sync;
pub mod stock_check;

pub use health::health_check;
pub use inventory::{
    audit_balance, delete_movements, get_balance, get_balance_as_of, get_history, list_balances,
    post_movement,
};
pub use production::transform;
pub use recipe::{expand_recipe, resolve_conversion};
pub use sales_sync::sync_sales;
pub use stock_check::{apply_adjustment, preview_variance, record_count};
