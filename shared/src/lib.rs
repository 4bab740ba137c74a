//! Shared types and domain logic for the inventory ledger
//!
//! Everything in this crate is free of I/O: the backend loads rows, hands them
//! to these functions and persists whatever they decide.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
