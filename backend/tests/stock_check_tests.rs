//! Variance reconciliation tests
//!
//! Tests for:
//! - Variance computed against the balance captured at count time
//! - Latest-count selection per key and date
//! - Chronology: a later applied adjustment blocks earlier ones
//! - Adjustment outcome bookkeeping

mod common;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use common::{dec, MemoryLedger};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    evaluate_variance, latest_counts, validate_counted_quantity, AdjustmentDecision,
    AdjustmentOutcome, AppliedCount, BalanceKey, NewLedgerEntry, PhysicalCount, TransactionType,
};
use uuid::Uuid;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn count(id: i64, key: BalanceKey, check_date: &str, counted: &str, system: &str) -> PhysicalCount {
    PhysicalCount {
        id,
        department_id: key.department_id,
        product_id: key.product_id,
        check_date: date(check_date),
        counted_quantity: dec(counted),
        system_quantity: dec(system),
        ledger_cursor: None,
        counted_by: None,
        checked_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(id),
    }
}

fn key() -> BalanceKey {
    BalanceKey::new(Uuid::new_v4(), Uuid::new_v4())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test variance sign: counted minus system
    #[test]
    fn test_variance_sign() {
        let k = key();
        assert_eq!(count(1, k, "2024-03-01", "10", "12").variance(), dec("-2"));
        assert_eq!(count(2, k, "2024-03-01", "15", "12").variance(), dec("3"));
    }

    /// Test counted quantity must not be negative
    #[test]
    fn test_counted_quantity_validation() {
        assert!(validate_counted_quantity(dec("0")).is_ok());
        assert!(validate_counted_quantity(dec("-0.01")).is_err());
    }

    /// Test variance uses the snapshot, not later movements
    #[test]
    fn test_variance_is_stable_after_later_movements() {
        let k = key();
        let mut ledger = MemoryLedger::default();
        ledger.post(&NewLedgerEntry::new(k.product_id, k.department_id, TransactionType::Initial, dec("12")));

        let mut c = count(1, k, "2024-03-01", "10", "12");
        c.ledger_cursor = ledger.last_id(k);

        ledger.post(&NewLedgerEntry::new(k.product_id, k.department_id, TransactionType::Sale, dec("-4")));

        let item = evaluate_variance(&c, &[]);
        assert_eq!(item.variance, dec("-2"));
        assert_eq!(ledger.as_of(k, c.ledger_cursor.unwrap()), c.system_quantity);
        assert_eq!(ledger.balance(k), dec("8"));
    }

    /// Test latest count per date wins
    #[test]
    fn test_latest_counts() {
        let k = key();
        let other = key();
        let counts = vec![
            count(1, k, "2024-03-01", "5", "5"),
            count(3, k, "2024-03-01", "7", "5"),
            count(2, k, "2024-03-01", "6", "5"),
            count(4, k, "2024-03-02", "9", "5"),
            count(5, other, "2024-03-01", "1", "1"),
        ];

        let latest = latest_counts(counts);
        assert_eq!(latest.len(), 3);
        let march_first: Vec<_> = latest
            .iter()
            .filter(|c| c.product_id == k.product_id && c.check_date == date("2024-03-01"))
            .collect();
        assert_eq!(march_first.len(), 1);
        assert_eq!(march_first[0].id, 3);
    }

    /// Test same checked_at falls back to the higher id
    #[test]
    fn test_latest_counts_tie_breaks_on_id() {
        let k = key();
        let a = count(8, k, "2024-03-01", "1", "0");
        let mut b = count(9, k, "2024-03-01", "2", "0");
        b.checked_at = a.checked_at;

        let latest = latest_counts(vec![b, a]);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, 9);
    }

    /// Test an unapplied non-zero variance is appliable
    #[test]
    fn test_fresh_count_is_appliable() {
        let item = evaluate_variance(&count(1, key(), "2024-03-01", "10", "12"), &[]);
        assert!(item.appliable);
        assert!(!item.is_applied);
        assert!(!item.has_newer_applied);
        assert_eq!(item.decision(), AdjustmentDecision::Apply(dec("-2")));
    }

    /// Test an adjustment for this exact count marks it applied
    #[test]
    fn test_already_applied() {
        let c = count(2, key(), "2024-03-05", "10", "12");
        let applied = [AppliedCount {
            count_id: 2,
            check_date: date("2024-03-05"),
        }];
        let item = evaluate_variance(&c, &applied);
        assert!(item.is_applied);
        assert!(!item.appliable);
        assert_eq!(item.decision(), AdjustmentDecision::SkipAlreadyApplied);
    }

    /// Test a recount after a same-day adjustment posts only the residual
    #[test]
    fn test_same_day_recount_after_adjustment() {
        let k = key();
        let mut ledger = MemoryLedger::default();
        ledger.post(&NewLedgerEntry::new(k.product_id, k.department_id, TransactionType::Initial, dec("12")));

        let first = count(1, k, "2024-03-05", "10", "12");
        let mut applied: Vec<AppliedCount> = Vec::new();
        if let AdjustmentDecision::Apply(v) = evaluate_variance(&first, &applied).decision() {
            ledger.post(&NewLedgerEntry::new(k.product_id, k.department_id, TransactionType::Adjustment, v));
            applied.push(AppliedCount {
                count_id: first.id,
                check_date: first.check_date,
            });
        }
        assert_eq!(ledger.balance(k), dec("10"));

        // Recount captures the adjusted balance as its snapshot
        let recount = count(2, k, "2024-03-05", "9", "10");
        let item = evaluate_variance(&recount, &applied);
        assert!(!item.is_applied);
        assert!(!item.has_newer_applied);
        assert_eq!(item.decision(), AdjustmentDecision::Apply(dec("-1")));

        // The first count itself stays applied
        assert!(evaluate_variance(&first, &applied).is_applied);
    }

    /// Test a later applied adjustment blocks an earlier date
    #[test]
    fn test_newer_applied_blocks() {
        let c = count(1, key(), "2024-03-01", "10", "12");
        let applied = [AppliedCount {
            count_id: 7,
            check_date: date("2024-03-10"),
        }];
        let item = evaluate_variance(&c, &applied);
        assert!(item.has_newer_applied);
        assert!(!item.appliable);
        assert_eq!(item.decision(), AdjustmentDecision::SkipNewerApplied);
    }

    /// Test an earlier applied adjustment does not block a later count
    #[test]
    fn test_older_applied_does_not_block() {
        let c = count(5, key(), "2024-03-10", "10", "12");
        let applied = [AppliedCount {
            count_id: 1,
            check_date: date("2024-03-01"),
        }];
        let item = evaluate_variance(&c, &applied);
        assert!(item.appliable);
    }

    /// Test zero variance is skipped
    #[test]
    fn test_zero_variance() {
        let item = evaluate_variance(&count(1, key(), "2024-03-01", "12", "12.000"), &[]);
        assert!(!item.appliable);
        assert_eq!(item.decision(), AdjustmentDecision::SkipZeroVariance);
    }

    /// Test outcome counters
    #[test]
    fn test_outcome_record() {
        let mut outcome = AdjustmentOutcome::default();
        outcome.record(AdjustmentDecision::Apply(dec("1")));
        outcome.record(AdjustmentDecision::Apply(dec("-1")));
        outcome.record(AdjustmentDecision::SkipNewerApplied);
        outcome.record(AdjustmentDecision::SkipZeroVariance);
        outcome.record(AdjustmentDecision::SkipAlreadyApplied);

        assert_eq!(outcome.total_adjustments, 2);
        assert_eq!(outcome.skipped_newer_applied, 1);
        assert_eq!(outcome.skipped_zero_variance, 1);
        assert_eq!(outcome.skipped_already_applied, 1);
    }

    /// Test applying D2 then attempting D1 leaves the balance untouched
    #[test]
    fn test_chronology_rejection_keeps_balance() {
        let k = key();
        let mut ledger = MemoryLedger::default();
        ledger.post(&NewLedgerEntry::new(k.product_id, k.department_id, TransactionType::Initial, dec("20")));

        let early = count(1, k, "2024-03-01", "18", "20");
        let late = count(2, k, "2024-03-05", "17", "20");
        let mut applied: Vec<AppliedCount> = Vec::new();

        if let AdjustmentDecision::Apply(v) = evaluate_variance(&late, &applied).decision() {
            ledger.post(&NewLedgerEntry::new(k.product_id, k.department_id, TransactionType::Adjustment, v));
            applied.push(AppliedCount {
                count_id: late.id,
                check_date: late.check_date,
            });
        }
        assert_eq!(ledger.balance(k), dec("17"));

        let decision = evaluate_variance(&early, &applied).decision();
        assert_eq!(decision, AdjustmentDecision::SkipNewerApplied);
        assert_eq!(ledger.balance(k), dec("17"));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A count is appliable exactly when it has a non-zero variance, no
    /// adjustment of its own and none on a later date
    #[test]
    fn prop_appliable_rule(
        counted in 0i64..1000,
        system in -100i64..1000,
        applied_offsets in prop::collection::vec(-10i64..10, 0..5)
    ) {
        let base = date("2024-06-15");
        let c = PhysicalCount {
            id: 1,
            department_id: Uuid::nil(),
            product_id: Uuid::nil(),
            check_date: base,
            counted_quantity: Decimal::from(counted),
            system_quantity: Decimal::from(system),
            ledger_cursor: None,
            counted_by: None,
            checked_at: Utc::now(),
        };
        let applied: Vec<AppliedCount> = applied_offsets
            .iter()
            .enumerate()
            .map(|(i, d)| AppliedCount {
                count_id: i as i64 + 10,
                check_date: base + Duration::days(*d),
            })
            .collect();

        let item = evaluate_variance(&c, &applied);
        let blocked = applied_offsets.iter().any(|d| *d > 0);
        prop_assert_eq!(item.appliable, !blocked && counted != system);
        prop_assert_eq!(item.variance, Decimal::from(counted - system));
    }
}
