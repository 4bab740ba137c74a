//! Ledger store tests
//!
//! Tests for the ledger arithmetic including:
//! - balance_after == balance_before + quantity on every posted entry
//! - Balance equals the last balance_after of its key
//! - Canonical lock ordering
//! - Chain audit and balance-as-of replay
//! - Negative-stock policy
//! - Rounding to the ledger scale
//! - Destructive reversal arithmetic and guards

mod common;

use common::{dec, MemoryLedger};
use proptest::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use shared::{
    apply_movement, audit_chain, lock_order, replay, reverse_removed, to_ledger_scale,
    validate_manual_reference, validate_movement, validate_reversal_confirmed, verify_entry,
    BalanceKey, ChainBreak, LedgerEntry, LedgerInvariantError, NewLedgerEntry, TransactionType,
    LEDGER_SCALE, RESERVED_REFERENCE_TYPES,
};
use std::collections::BTreeMap;
use stock_ledger::config::NegativeStockPolicy;
use uuid::Uuid;

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test transaction type names match the stored enum labels
    #[test]
    fn test_transaction_type_names() {
        let names: Vec<&str> = TransactionType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"production_transform_out"));

        for t in TransactionType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    /// Test sign conventions for manual movements
    #[test]
    fn test_manual_movement_signs() {
        assert!(validate_movement(TransactionType::TransferIn, dec("1")).is_ok());
        assert!(validate_movement(TransactionType::TransferOut, dec("1")).is_err());
        assert!(validate_movement(TransactionType::ProductionTransformOut, dec("-0.5")).is_ok());
        assert!(validate_movement(TransactionType::Initial, dec("-4")).is_ok());
        assert!(TransactionType::Sale.is_consumption());
        assert!(!TransactionType::Adjustment.is_consumption());
    }

    /// Test the example sequence 10 -> 15 -> 12
    #[test]
    fn test_posting_sequence() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let mut ledger = MemoryLedger::default();

        let initial = ledger.post(&NewLedgerEntry::new(
            key.product_id,
            key.department_id,
            TransactionType::Initial,
            dec("10"),
        ));
        let receive = ledger.post(&NewLedgerEntry::new(
            key.product_id,
            key.department_id,
            TransactionType::Receive,
            dec("5"),
        ));
        let sale = ledger.post(&NewLedgerEntry::new(
            key.product_id,
            key.department_id,
            TransactionType::Sale,
            dec("-3"),
        ));

        assert_eq!(initial.balance_after, dec("10"));
        assert_eq!(receive.balance_before, dec("10"));
        assert_eq!(receive.balance_after, dec("15"));
        assert_eq!(sale.balance_after, dec("12"));
        assert_eq!(ledger.balances[&key], dec("12"));
    }

    /// Test verify_entry flags a rounded balance_after
    #[test]
    fn test_verify_entry_mismatch() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let mut ledger = MemoryLedger::default();
        let mut entry = ledger.post(&NewLedgerEntry::new(
            key.product_id,
            key.department_id,
            TransactionType::Receive,
            dec("1.1234567"),
        ));
        assert!(verify_entry(&entry).is_ok());

        entry.balance_after = dec("1.123457");
        match verify_entry(&entry) {
            Err(LedgerInvariantError::Mismatch { entry_id, .. }) => assert_eq!(entry_id, entry.id),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    /// Test overflow is an invariant error, not a panic
    #[test]
    fn test_apply_movement_overflow() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let result = apply_movement(key, Decimal::MAX, Decimal::ONE);
        assert!(matches!(result, Err(LedgerInvariantError::Overflow { .. })));
    }

    /// Test lock order is sorted and distinct
    #[test]
    fn test_lock_order() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let d1 = Uuid::from_u128(10);
        let d2 = Uuid::from_u128(20);

        let keys = vec![
            BalanceKey::new(b, d1),
            BalanceKey::new(a, d2),
            BalanceKey::new(a, d1),
            BalanceKey::new(b, d1),
        ];
        let ordered = lock_order(keys);

        assert_eq!(
            ordered,
            vec![BalanceKey::new(a, d1), BalanceKey::new(a, d2), BalanceKey::new(b, d1)]
        );
    }

    /// Test two batches over the same keys lock in the same order
    #[test]
    fn test_lock_order_independent_of_batch_order() {
        let keys: Vec<BalanceKey> = (0..5)
            .map(|_| BalanceKey::new(Uuid::new_v4(), Uuid::new_v4()))
            .collect();
        let mut reversed = keys.clone();
        reversed.reverse();

        assert_eq!(lock_order(keys), lock_order(reversed));
    }

    /// Test a clean chain audits clean
    #[test]
    fn test_audit_clean_chain() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let mut ledger = MemoryLedger::default();
        for q in ["10", "5", "-3", "-2"] {
            ledger.post(&NewLedgerEntry::new(
                key.product_id,
                key.department_id,
                TransactionType::Adjustment,
                dec(q),
            ));
        }

        let audit = audit_chain(key, &ledger.history(key), Some(ledger.balances[&key]));
        assert!(audit.is_clean());
        assert_eq!(audit.entries_checked, 4);
        assert_eq!(audit.replayed_quantity, dec("10"));
        assert_eq!(audit.last_balance_after, Some(dec("10")));
    }

    /// Test a tampered row shows up as a discontinuity and a balance mismatch
    #[test]
    fn test_audit_detects_breaks() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let mut ledger = MemoryLedger::default();
        for q in ["10", "5", "-3"] {
            ledger.post(&NewLedgerEntry::new(
                key.product_id,
                key.department_id,
                TransactionType::Adjustment,
                dec(q),
            ));
        }

        let mut history = ledger.history(key);
        history[1].balance_before = dec("11");
        history[1].balance_after = dec("16");

        let audit = audit_chain(key, &history, Some(dec("12")));
        assert!(!audit.is_clean());
        assert!(audit.breaks.contains(&ChainBreak::Discontinuity {
            entry_id: history[1].id,
            expected_before: dec("10"),
            actual_before: dec("11"),
        }));
        // Entry 3 starts from 15, but entry 2 now ends at 16
        assert!(audit
            .breaks
            .iter()
            .any(|b| matches!(b, ChainBreak::Discontinuity { entry_id, .. } if *entry_id == history[2].id)));
    }

    /// Test a key with no entries matches a zero balance row
    #[test]
    fn test_audit_empty_key() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(audit_chain(key, &[], None).is_clean());
        assert!(audit_chain(key, &[], Some(Decimal::ZERO)).is_clean());
        assert!(!audit_chain(key, &[], Some(dec("3"))).is_clean());
    }

    /// Test balance-as-of ignores later entries and other keys
    #[test]
    fn test_balance_as_of() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let other = BalanceKey::new(Uuid::new_v4(), key.department_id);
        let mut ledger = MemoryLedger::default();

        ledger.post(&NewLedgerEntry::new(key.product_id, key.department_id, TransactionType::Initial, dec("10")));
        ledger.post(&NewLedgerEntry::new(other.product_id, other.department_id, TransactionType::Initial, dec("99")));
        let cursor = ledger
            .post(&NewLedgerEntry::new(key.product_id, key.department_id, TransactionType::Receive, dec("5")))
            .id;
        ledger.post(&NewLedgerEntry::new(key.product_id, key.department_id, TransactionType::Sale, dec("-3")));

        assert_eq!(ledger.as_of(key, cursor), dec("15"));
        assert_eq!(ledger.as_of(key, 0), Decimal::ZERO);
        assert_eq!(ledger.as_of(key, i64::MAX), dec("12"));
    }

    /// Test negative-stock policy only blocks outbound movements going below zero
    #[test]
    fn test_negative_stock_policy() {
        let reject = NegativeStockPolicy::Reject;
        assert!(reject.permits(dec("-3"), dec("0")));
        assert!(!reject.permits(dec("-3"), dec("-1")));
        // Receiving into an already negative balance is still allowed
        assert!(reject.permits(dec("2"), dec("-1")));

        let allow = NegativeStockPolicy::default();
        assert_eq!(allow, NegativeStockPolicy::Allow);
        assert!(allow.permits(dec("-3"), dec("-1")));
    }

    /// Test policy deserializes from config strings
    #[test]
    fn test_negative_stock_policy_from_config() {
        let policy: NegativeStockPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(policy, NegativeStockPolicy::Reject);
        assert!(serde_json::from_str::<NegativeStockPolicy>("\"warn\"").is_err());
    }

    /// Test a sub-scale half quantity is rounded before balance_after is computed
    #[test]
    fn test_quantity_rounded_to_ledger_scale() {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let column = |d: Decimal| {
            d.round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointAwayFromZero)
        };
        let before = dec("1");
        let raw = dec("-0.0000015");

        // Storing the raw values would round each column on its own
        assert_ne!(column(before + raw), before + column(raw));

        let quantity = to_ledger_scale(raw);
        assert_eq!(quantity, dec("-0.000002"));
        let after = apply_movement(key, before, quantity).unwrap();
        assert_eq!(after, dec("0.999998"));
        assert_eq!(column(after), after);

        let mut ledger = MemoryLedger::default();
        ledger.post(&NewLedgerEntry::new(key.product_id, key.department_id, TransactionType::Initial, before));
        let posted = ledger.post(&NewLedgerEntry::new(key.product_id, key.department_id, TransactionType::Sale, raw));
        assert_eq!(posted.quantity, dec("-0.000002"));
        assert!(verify_entry(&posted).is_ok());

        assert!(to_ledger_scale(dec("0.0000004")).is_zero());
        assert_eq!(to_ledger_scale(dec("0.0000005")), dec("0.000001"));
    }

    /// Test reversing deleted sales leaves each balance at the replay of the
    /// entries that remain
    #[test]
    fn test_reverse_removed_matches_remaining_replay() {
        let a = BalanceKey::new(Uuid::from_u128(1), Uuid::from_u128(10));
        let b = BalanceKey::new(Uuid::from_u128(2), Uuid::from_u128(10));
        let untouched = BalanceKey::new(Uuid::from_u128(3), Uuid::from_u128(10));
        let mut ledger = MemoryLedger::default();
        for (key, t, q) in [
            (a, TransactionType::Receive, "10"),
            (a, TransactionType::Sale, "-3"),
            (b, TransactionType::Initial, "4"),
            (untouched, TransactionType::Initial, "7"),
            (a, TransactionType::Sale, "-1.5"),
            (b, TransactionType::Sale, "-2"),
            (a, TransactionType::Receive, "2"),
        ] {
            ledger.post(&NewLedgerEntry::new(key.product_id, key.department_id, t, dec(q)));
        }

        let balances: BTreeMap<BalanceKey, Decimal> =
            ledger.balances.iter().map(|(k, q)| (*k, *q)).collect();
        let (deleted, kept): (Vec<&LedgerEntry>, Vec<&LedgerEntry>) = ledger
            .entries
            .iter()
            .partition(|e| e.transaction_type == TransactionType::Sale);

        let reversed = reverse_removed(&balances, deleted.iter().map(|e| (e.key(), e.quantity))).unwrap();
        assert_eq!(reversed.len(), 2);
        assert!(!reversed.contains_key(&untouched));
        assert_eq!(reversed[&a], dec("12"));
        assert_eq!(reversed[&b], dec("4"));
        for (key, quantity) in &reversed {
            assert_eq!(*quantity, replay(kept.iter().copied().filter(|e| e.key() == *key)));
        }

        // Later entries keep their old balance_before, which the audit reports
        let remaining_a: Vec<LedgerEntry> = kept.iter().filter(|e| e.key() == a).map(|e| (*e).clone()).collect();
        let audit = audit_chain(a, &remaining_a, Some(reversed[&a]));
        assert!(!audit.is_clean());
        assert!(matches!(audit.breaks[0], ChainBreak::Discontinuity { .. }));
    }

    /// Test destructive reversal needs an explicit confirmation
    #[test]
    fn test_reversal_requires_confirm() {
        assert!(validate_reversal_confirmed(false).is_err());
        assert!(validate_reversal_confirmed(true).is_ok());
    }

    /// Test manual movements cannot claim engine reference types
    #[test]
    fn test_manual_reference_reserved() {
        for reserved in RESERVED_REFERENCE_TYPES {
            assert!(validate_manual_reference(Some(reserved)).is_err(), "{}", reserved);
        }
        assert!(validate_manual_reference(Some(" stock_check ")).is_err());
        assert!(validate_manual_reference(Some("supplier_invoice")).is_ok());
        assert!(validate_manual_reference(None).is_ok());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (-100_000i64..100_000i64, 0u32..4u32)
        .prop_filter("non-zero", |(m, _)| *m != 0)
        .prop_map(|(m, scale)| Decimal::new(m, scale))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every posted entry satisfies the arithmetic invariant and balances
    /// always equal the last balance_after of their key
    #[test]
    fn prop_balance_matches_last_entry(
        movements in prop::collection::vec((0usize..3, 0usize..2, quantity_strategy()), 1..60)
    ) {
        let products: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let departments: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let mut ledger = MemoryLedger::default();

        for (p, d, q) in &movements {
            let entry = ledger.post(&NewLedgerEntry::new(
                products[*p],
                departments[*d],
                TransactionType::Adjustment,
                *q,
            ));
            prop_assert!(verify_entry(&entry).is_ok());
        }

        for (key, balance) in &ledger.balances {
            let history = ledger.history(*key);
            prop_assert_eq!(history.last().map(|e| e.balance_after), Some(*balance));
            prop_assert_eq!(replay(&history), *balance);
            prop_assert!(audit_chain(*key, &history, Some(*balance)).is_clean());
        }
    }

    /// Balance as of any cursor equals the balance_after of the last entry at
    /// or before it
    #[test]
    fn prop_as_of_matches_chain(quantities in prop::collection::vec(quantity_strategy(), 1..40)) {
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let mut ledger = MemoryLedger::default();
        for q in &quantities {
            ledger.post(&NewLedgerEntry::new(key.product_id, key.department_id, TransactionType::Adjustment, *q));
        }

        for entry in &ledger.entries {
            prop_assert_eq!(ledger.as_of(key, entry.id), entry.balance_after);
        }
    }

    /// Lock order never depends on input order
    #[test]
    fn prop_lock_order_is_canonical(seeds in prop::collection::vec((0u128..8, 0u128..4), 0..20)) {
        let keys: Vec<BalanceKey> = seeds
            .iter()
            .map(|(p, d)| BalanceKey::new(Uuid::from_u128(*p), Uuid::from_u128(*d)))
            .collect();
        let mut shuffled = keys.clone();
        shuffled.reverse();

        let ordered = lock_order(keys);
        prop_assert_eq!(&ordered, &lock_order(shuffled));
        prop_assert!(ordered.windows(2).all(|w| w[0] < w[1]));
    }

    /// Reversing any subset of entries leaves the balance each key would
    /// have had without them
    #[test]
    fn prop_reversal_matches_replay(
        movements in prop::collection::vec((0u128..3, quantity_strategy(), any::<bool>()), 1..40)
    ) {
        let department = Uuid::from_u128(99);
        let mut ledger = MemoryLedger::default();
        let mut doomed = Vec::new();
        for (product, quantity, delete) in &movements {
            let posted = ledger.post(&NewLedgerEntry::new(
                Uuid::from_u128(*product),
                department,
                TransactionType::Adjustment,
                *quantity,
            ));
            if *delete {
                doomed.push(posted.id);
            }
        }

        let balances: BTreeMap<BalanceKey, Decimal> =
            ledger.balances.iter().map(|(k, q)| (*k, *q)).collect();
        let reversed = reverse_removed(
            &balances,
            ledger
                .entries
                .iter()
                .filter(|e| doomed.contains(&e.id))
                .map(|e| (e.key(), e.quantity)),
        )
        .unwrap();

        for (key, quantity) in reversed {
            let remaining = replay(
                ledger
                    .entries
                    .iter()
                    .filter(|e| e.key() == key && !doomed.contains(&e.id)),
            );
            prop_assert_eq!(quantity, remaining);
        }
    }
}
