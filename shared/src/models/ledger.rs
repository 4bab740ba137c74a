//! Ledger entries, balances and the arithmetic that ties them together

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Kind of stock movement recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "ledger_transaction_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Receive,
    Sale,
    Adjustment,
    TransferIn,
    TransferOut,
    Initial,
    ProductionTransformIn,
    ProductionTransformOut,
}

impl TransactionType {
    pub const ALL: [TransactionType; 8] = [
        TransactionType::Receive,
        TransactionType::Sale,
        TransactionType::Adjustment,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
        TransactionType::Initial,
        TransactionType::ProductionTransformIn,
        TransactionType::ProductionTransformOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Receive => "receive",
            TransactionType::Sale => "sale",
            TransactionType::Adjustment => "adjustment",
            TransactionType::TransferIn => "transfer_in",
            TransactionType::TransferOut => "transfer_out",
            TransactionType::Initial => "initial",
            TransactionType::ProductionTransformIn => "production_transform_in",
            TransactionType::ProductionTransformOut => "production_transform_out",
        }
    }

    /// Direction a quantity of this type is expected to carry.
    ///
    /// The ledger itself never enforces this; callers that accept user input
    /// check it before posting.
    pub fn sign_convention(&self) -> SignConvention {
        match self {
            TransactionType::Receive
            | TransactionType::TransferIn
            | TransactionType::ProductionTransformIn => SignConvention::Positive,
            TransactionType::Sale
            | TransactionType::TransferOut
            | TransactionType::ProductionTransformOut => SignConvention::Negative,
            TransactionType::Adjustment | TransactionType::Initial => SignConvention::NonZero,
        }
    }

    /// Outbound movements that draw stock down
    pub fn is_consumption(&self) -> bool {
        self.sign_convention() == SignConvention::Negative
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected sign of a movement quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignConvention {
    Positive,
    Negative,
    NonZero,
}

impl SignConvention {
    pub fn accepts(&self, quantity: Decimal) -> bool {
        match self {
            SignConvention::Positive => quantity > Decimal::ZERO,
            SignConvention::Negative => quantity < Decimal::ZERO,
            SignConvention::NonZero => !quantity.is_zero(),
        }
    }
}

/// Identity of one balance row. `Ord` gives the canonical lock order:
/// ascending product, then department.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub product_id: Uuid,
    pub department_id: Uuid,
}

impl BalanceKey {
    pub fn new(product_id: Uuid, department_id: Uuid) -> Self {
        Self {
            product_id,
            department_id,
        }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.product_id, self.department_id)
    }
}

/// An immutable ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LedgerEntry {
    pub id: i64,
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.product_id, self.department_id)
    }
}

/// A movement waiting to be posted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

impl NewLedgerEntry {
    pub fn new(
        product_id: Uuid,
        department_id: Uuid,
        transaction_type: TransactionType,
        quantity: Decimal,
    ) -> Self {
        Self {
            product_id,
            department_id,
            transaction_type,
            quantity,
            reference_type: None,
            reference_id: None,
            notes: None,
            created_by: None,
        }
    }

    pub fn with_reference(mut self, reference_type: &str, reference_id: impl Into<String>) -> Self {
        self.reference_type = Some(reference_type.to_string());
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn created_by(mut self, actor: Option<Uuid>) -> Self {
        self.created_by = actor;
        self
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.product_id, self.department_id)
    }
}

/// Materialized current quantity for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Balance {
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub quantity: Decimal,
    pub last_transaction_id: Option<i64>,
    pub last_updated: DateTime<Utc>,
}

impl Balance {
    /// Balance of a key that has never been posted to
    pub fn empty(key: BalanceKey) -> Self {
        Self {
            product_id: key.product_id,
            department_id: key.department_id,
            quantity: Decimal::ZERO,
            last_transaction_id: None,
            last_updated: DateTime::<Utc>::default(),
        }
    }
}

/// Broken ledger arithmetic. Always a programming defect, never bad input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerInvariantError {
    #[error("balance overflow on {key}: {balance_before} + {quantity}")]
    Overflow {
        key: BalanceKey,
        balance_before: Decimal,
        quantity: Decimal,
    },

    #[error(
        "entry {entry_id} on {key}: balance_after {balance_after} != {balance_before} + {quantity}"
    )]
    Mismatch {
        entry_id: i64,
        key: BalanceKey,
        balance_before: Decimal,
        quantity: Decimal,
        balance_after: Decimal,
    },
}

/// Decimal places of every quantity column in the ledger
pub const LEDGER_SCALE: u32 = 6;

/// Round a quantity to the ledger scale, half away from zero like Postgres
/// `NUMERIC` does.
///
/// Quantities must be rounded before `balance_after` is computed. Rounding
/// the quantity and the sum separately can leave a stored row where
/// `balance_after != balance_before + quantity`.
pub fn to_ledger_scale(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute `balance_after` for a movement on `key`
pub fn apply_movement(
    key: BalanceKey,
    balance_before: Decimal,
    quantity: Decimal,
) -> Result<Decimal, LedgerInvariantError> {
    balance_before
        .checked_add(quantity)
        .ok_or(LedgerInvariantError::Overflow {
            key,
            balance_before,
            quantity,
        })
}

/// Check `balance_after == balance_before + quantity` on a stored row.
///
/// Catches values the database rounded to its column scale on the way in.
pub fn verify_entry(entry: &LedgerEntry) -> Result<(), LedgerInvariantError> {
    let expected = apply_movement(entry.key(), entry.balance_before, entry.quantity)?;
    if expected != entry.balance_after {
        return Err(LedgerInvariantError::Mismatch {
            entry_id: entry.id,
            key: entry.key(),
            balance_before: entry.balance_before,
            quantity: entry.quantity,
            balance_after: entry.balance_after,
        });
    }
    Ok(())
}

/// Balances left after deleting ledger rows.
///
/// `balances` holds each key's locked balance before the delete and `removed`
/// the deleted rows as `(key, quantity)`. Only keys with removed rows are
/// returned.
pub fn reverse_removed<I>(
    balances: &BTreeMap<BalanceKey, Decimal>,
    removed: I,
) -> Result<BTreeMap<BalanceKey, Decimal>, LedgerInvariantError>
where
    I: IntoIterator<Item = (BalanceKey, Decimal)>,
{
    let mut totals: BTreeMap<BalanceKey, Decimal> = BTreeMap::new();
    for (key, quantity) in removed {
        let total = totals.entry(key).or_default();
        *total = apply_movement(key, *total, quantity)?;
    }

    totals
        .into_iter()
        .map(|(key, total)| {
            let before = balances.get(&key).copied().unwrap_or_default();
            apply_movement(key, before, -total).map(|after| (key, after))
        })
        .collect()
}

/// Distinct keys in the order their locks must be taken
pub fn lock_order<I>(keys: I) -> Vec<BalanceKey>
where
    I: IntoIterator<Item = BalanceKey>,
{
    keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Balance implied by replaying entries from zero
pub fn replay<'a, I>(entries: I) -> Decimal
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    entries.into_iter().map(|e| e.quantity).sum()
}

/// Where a key's history stops adding up
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainBreak {
    /// `balance_after` does not equal `balance_before + quantity`
    Arithmetic { entry_id: i64 },
    /// `balance_before` does not continue from the previous entry
    Discontinuity {
        entry_id: i64,
        expected_before: Decimal,
        actual_before: Decimal,
    },
}

/// Result of replaying one key
#[derive(Debug, Clone, Serialize)]
pub struct ChainAudit {
    pub key: BalanceKey,
    pub entries_checked: usize,
    pub replayed_quantity: Decimal,
    pub last_balance_after: Option<Decimal>,
    pub balance_quantity: Option<Decimal>,
    pub balance_matches: bool,
    pub breaks: Vec<ChainBreak>,
}

impl ChainAudit {
    pub fn is_clean(&self) -> bool {
        self.breaks.is_empty() && self.balance_matches
    }
}

/// Replay `entries` (commit order) and compare against the stored balance
pub fn audit_chain(key: BalanceKey, entries: &[LedgerEntry], balance: Option<Decimal>) -> ChainAudit {
    let mut breaks = Vec::new();
    let mut previous_after = Decimal::ZERO;

    for entry in entries {
        if entry.balance_before != previous_after {
            breaks.push(ChainBreak::Discontinuity {
                entry_id: entry.id,
                expected_before: previous_after,
                actual_before: entry.balance_before,
            });
        }
        if verify_entry(entry).is_err() {
            breaks.push(ChainBreak::Arithmetic { entry_id: entry.id });
        }
        previous_after = entry.balance_after;
    }

    let last_balance_after = entries.last().map(|e| e.balance_after);
    let balance_matches = match (balance, last_balance_after) {
        (Some(stored), Some(last)) => stored == last,
        (None, None) => true,
        (Some(stored), None) => stored.is_zero(),
        (None, Some(_)) => false,
    };

    ChainAudit {
        key,
        entries_checked: entries.len(),
        replayed_quantity: replay(entries),
        last_balance_after,
        balance_quantity: balance,
        balance_matches,
        breaks,
    }
}
