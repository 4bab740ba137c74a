//! Physical stock counts and variance against the ledger

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `reference_type` of adjustments posted from a stock count
pub const STOCK_CHECK_REFERENCE: &str = "stock_check";

/// A recorded physical count.
///
/// `system_quantity` and `ledger_cursor` are captured under the key lock at
/// count time, so the variance does not move when later movements arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PhysicalCount {
    pub id: i64,
    pub department_id: Uuid,
    pub product_id: Uuid,
    pub check_date: NaiveDate,
    pub counted_quantity: Decimal,
    pub system_quantity: Decimal,
    pub ledger_cursor: Option<i64>,
    pub counted_by: Option<Uuid>,
    pub checked_at: DateTime<Utc>,
}

impl PhysicalCount {
    /// Counted minus system
    pub fn variance(&self) -> Decimal {
        self.counted_quantity - self.system_quantity
    }

    /// Reference id of the adjustment that applies this count
    pub fn reference_id(&self) -> String {
        self.id.to_string()
    }

    fn supersedes(&self, other: &PhysicalCount) -> bool {
        (self.checked_at, self.id) > (other.checked_at, other.id)
    }
}

/// A count of the same key that already has an adjustment posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AppliedCount {
    pub count_id: i64,
    pub check_date: NaiveDate,
}

/// Keep only the latest count per (product, department, date).
///
/// Result is ordered by product then department.
pub fn latest_counts(counts: Vec<PhysicalCount>) -> Vec<PhysicalCount> {
    let mut latest: BTreeMap<(Uuid, Uuid, NaiveDate), PhysicalCount> = BTreeMap::new();
    for count in counts {
        let key = (count.product_id, count.department_id, count.check_date);
        match latest.get(&key) {
            Some(current) if !count.supersedes(current) => {}
            _ => {
                latest.insert(key, count);
            }
        }
    }
    latest.into_values().collect()
}

/// One row of the variance preview
#[derive(Debug, Clone, Serialize)]
pub struct VarianceItem {
    pub count_id: i64,
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub check_date: NaiveDate,
    pub counted_quantity: Decimal,
    pub system_quantity: Decimal,
    pub variance: Decimal,
    /// An adjustment was posted for this exact count
    pub is_applied: bool,
    /// An adjustment exists for a count of this key on a later date
    pub has_newer_applied: bool,
    pub appliable: bool,
}

/// What `apply_adjustment` does with one selected row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentDecision {
    Apply(Decimal),
    SkipAlreadyApplied,
    SkipNewerApplied,
    SkipZeroVariance,
}

/// Evaluate a count against the adjustments already applied to its key.
///
/// A recount taken after a same-day adjustment stays appliable: its snapshot
/// already includes that adjustment, so only the residual is posted.
pub fn evaluate_variance(count: &PhysicalCount, applied: &[AppliedCount]) -> VarianceItem {
    let is_applied = applied.iter().any(|a| a.count_id == count.id);
    let has_newer_applied = applied.iter().any(|a| a.check_date > count.check_date);
    let variance = count.variance();

    VarianceItem {
        count_id: count.id,
        product_id: count.product_id,
        department_id: count.department_id,
        check_date: count.check_date,
        counted_quantity: count.counted_quantity,
        system_quantity: count.system_quantity,
        variance,
        is_applied,
        has_newer_applied,
        appliable: !is_applied && !has_newer_applied && !variance.is_zero(),
    }
}

impl VarianceItem {
    pub fn decision(&self) -> AdjustmentDecision {
        if self.is_applied {
            AdjustmentDecision::SkipAlreadyApplied
        } else if self.has_newer_applied {
            AdjustmentDecision::SkipNewerApplied
        } else if self.variance.is_zero() {
            AdjustmentDecision::SkipZeroVariance
        } else {
            AdjustmentDecision::Apply(self.variance)
        }
    }
}

/// Outcome of `apply_adjustment`
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdjustmentOutcome {
    pub total_adjustments: usize,
    pub skipped_already_applied: usize,
    pub skipped_newer_applied: usize,
    pub skipped_zero_variance: usize,
    /// Selected products with no count on the date
    pub skipped_not_counted: Vec<Uuid>,
    pub entry_ids: Vec<i64>,
}

impl AdjustmentOutcome {
    pub fn record(&mut self, decision: AdjustmentDecision) {
        match decision {
            AdjustmentDecision::Apply(_) => self.total_adjustments += 1,
            AdjustmentDecision::SkipAlreadyApplied => self.skipped_already_applied += 1,
            AdjustmentDecision::SkipNewerApplied => self.skipped_newer_applied += 1,
            AdjustmentDecision::SkipZeroVariance => self.skipped_zero_variance += 1,
        }
    }
}
