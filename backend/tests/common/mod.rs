//! Helpers shared by the integration tests

#![allow(dead_code)]

use chrono::Utc;
use rust_decimal::Decimal;
use shared::{apply_movement, replay, to_ledger_scale, BalanceKey, LedgerEntry, NewLedgerEntry};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// In-memory stand-in for the ledger tables, posting the way the store does
#[derive(Default)]
pub struct MemoryLedger {
    pub entries: Vec<LedgerEntry>,
    pub balances: HashMap<BalanceKey, Decimal>,
}

impl MemoryLedger {
    pub fn post(&mut self, entry: &NewLedgerEntry) -> LedgerEntry {
        let key = entry.key();
        let quantity = to_ledger_scale(entry.quantity);
        let before = self.balance(key);
        let after = apply_movement(key, before, quantity).unwrap();
        let posted = LedgerEntry {
            id: self.entries.len() as i64 + 1,
            product_id: entry.product_id,
            department_id: entry.department_id,
            transaction_type: entry.transaction_type,
            quantity,
            balance_before: before,
            balance_after: after,
            reference_type: entry.reference_type.clone(),
            reference_id: entry.reference_id.clone(),
            notes: entry.notes.clone(),
            created_by: entry.created_by,
            created_at: Utc::now(),
        };
        self.balances.insert(key, after);
        self.entries.push(posted.clone());
        posted
    }

    pub fn balance(&self, key: BalanceKey) -> Decimal {
        self.balances.get(&key).copied().unwrap_or_default()
    }

    pub fn last_id(&self, key: BalanceKey) -> Option<i64> {
        self.entries.iter().rev().find(|e| e.key() == key).map(|e| e.id)
    }

    pub fn history(&self, key: BalanceKey) -> Vec<LedgerEntry> {
        self.entries.iter().filter(|e| e.key() == key).cloned().collect()
    }

    pub fn as_of(&self, key: BalanceKey, cursor: i64) -> Decimal {
        replay(self.entries.iter().filter(|e| e.key() == key && e.id <= cursor))
    }

    /// Products with an entry under a reference in one department
    pub fn posted_products(&self, reference_type: &str, reference_id: &str, department_id: Uuid) -> HashSet<Uuid> {
        self.entries
            .iter()
            .filter(|e| {
                e.reference_type.as_deref() == Some(reference_type)
                    && e.reference_id.as_deref() == Some(reference_id)
                    && e.department_id == department_id
            })
            .map(|e| e.product_id)
            .collect()
    }

    /// Net quantity posted on a key under a reference
    pub fn reference_net(&self, key: BalanceKey, reference_type: &str, reference_id: &str) -> Decimal {
        self.entries
            .iter()
            .filter(|e| {
                e.key() == key
                    && e.reference_type.as_deref() == Some(reference_type)
                    && e.reference_id.as_deref() == Some(reference_id)
            })
            .map(|e| e.quantity)
            .sum()
    }
}
