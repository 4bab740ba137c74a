//! Input validation for caller-facing ledger operations

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{
    SignConvention, TransactionType, ORDER_RECEIVE_REFERENCE, PRODUCTION_REFERENCE,
    RECEIVE_TRANSFER_REFERENCE, RECIPE_SALE_REFERENCE, STOCK_CHECK_REFERENCE,
};

/// Longest window a single sync or backfill call may cover
pub const MAX_RANGE_DAYS: i64 = 92;

/// Validate a manual movement against the sign convention of its type
pub fn validate_movement(
    transaction_type: TransactionType,
    quantity: Decimal,
) -> Result<(), &'static str> {
    if quantity.is_zero() {
        return Err("Quantity must not be zero");
    }
    match transaction_type.sign_convention() {
        SignConvention::Positive if quantity < Decimal::ZERO => {
            Err("Quantity must be positive for this transaction type")
        }
        SignConvention::Negative if quantity > Decimal::ZERO => {
            Err("Quantity must be negative for this transaction type")
        }
        _ => Ok(()),
    }
}

/// Reference types only the engine itself may post under
pub const RESERVED_REFERENCE_TYPES: [&str; 5] = [
    RECIPE_SALE_REFERENCE,
    ORDER_RECEIVE_REFERENCE,
    RECEIVE_TRANSFER_REFERENCE,
    STOCK_CHECK_REFERENCE,
    PRODUCTION_REFERENCE,
];

/// Reject a manual movement that claims an engine reference type
pub fn validate_manual_reference(reference_type: Option<&str>) -> Result<(), &'static str> {
    match reference_type {
        Some(t) if RESERVED_REFERENCE_TYPES.contains(&t.trim()) => {
            Err("Reference type is reserved for system-generated movements")
        }
        _ => Ok(()),
    }
}

/// Validate an inclusive date window
pub fn validate_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), &'static str> {
    if end < start {
        return Err("End date must not be before start date");
    }
    if (end - start).num_days() >= MAX_RANGE_DAYS {
        return Err("Date range is too long");
    }
    Ok(())
}

/// Destructive reversal only runs when the caller confirms it explicitly
pub fn validate_reversal_confirmed(confirm: bool) -> Result<(), &'static str> {
    if !confirm {
        return Err("Destructive reversal requires confirm=true");
    }
    Ok(())
}

/// Validate a counted quantity from a stock check
pub fn validate_counted_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Counted quantity cannot be negative");
    }
    Ok(())
}
