//! Planning for the historical backfill jobs

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{lock_order, BalanceKey, TransactionType};

/// `reference_type` of receive entries reconstructed from receiving events
pub const ORDER_RECEIVE_REFERENCE: &str = "order_receive";

/// `reference_type` of internal-storage transfers balancing a receiving event
pub const RECEIVE_TRANSFER_REFERENCE: &str = "receive_transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    DryRun,
    Execute,
}

impl BackfillMode {
    pub fn writes(&self) -> bool {
        matches!(self, BackfillMode::Execute)
    }
}

impl fmt::Display for BackfillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackfillMode::DryRun => f.write_str("dry-run"),
            BackfillMode::Execute => f.write_str("execute"),
        }
    }
}

/// A historical goods-received event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReceivingEvent {
    pub id: Uuid,
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub product_group_id: Option<Uuid>,
    pub quantity: Decimal,
    pub received_at: DateTime<Utc>,
}

/// Why a backfill candidate was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyPosted,
    NonPositiveQuantity,
    NoProductGroup,
    NoInternalSource,
    AmbiguousSource,
    AlreadyBalanced,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyPosted => "already_posted",
            SkipReason::NonPositiveQuantity => "non_positive_quantity",
            SkipReason::NoProductGroup => "no_product_group",
            SkipReason::NoInternalSource => "no_internal_source",
            SkipReason::AmbiguousSource => "ambiguous_source",
            SkipReason::AlreadyBalanced => "already_balanced",
        }
    }
}

/// Source department configured for a receiving event's target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceResolution {
    Single(Uuid),
    NoScope,
    Ambiguous(Vec<Uuid>),
}

/// Balance keys one backfill item touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillTarget {
    Receive(BalanceKey),
    /// `target` is only read; the balancing entry lands on `source`
    Transfer { target: BalanceKey, source: BalanceKey },
}

impl BackfillTarget {
    pub fn keys(&self) -> Vec<BalanceKey> {
        match self {
            BackfillTarget::Receive(key) => vec![*key],
            BackfillTarget::Transfer { target, source } => vec![*target, *source],
        }
    }
}

/// Every key an execute run touches, in the order the locks are taken.
///
/// The whole window runs in one transaction, so all locks are taken up front
/// instead of per event.
pub fn backfill_lock_order<'a, I>(targets: I) -> Vec<BalanceKey>
where
    I: IntoIterator<Item = &'a BackfillTarget>,
{
    lock_order(targets.into_iter().flat_map(BackfillTarget::keys))
}

/// Pick the internal source department for `target` from its configured scope.
///
/// The target itself never counts as a source. More than one distinct
/// candidate is ambiguous and is never tie-broken.
pub fn resolve_source_department(target: Uuid, candidates: &[Uuid]) -> SourceResolution {
    let mut distinct: Vec<Uuid> = candidates.iter().copied().filter(|c| *c != target).collect();
    distinct.sort();
    distinct.dedup();

    match distinct.len() {
        0 => SourceResolution::NoScope,
        1 => SourceResolution::Single(distinct[0]),
        _ => SourceResolution::Ambiguous(distinct),
    }
}

/// Movement that brings the source side in line with the target side.
///
/// The source should carry the mirror image of what the target received:
/// `-target_net`. Returns `None` when it already does.
pub fn transfer_delta(target_net: Decimal, source_net: Decimal) -> Option<(TransactionType, Decimal)> {
    let delta = -target_net - source_net;
    if delta.is_zero() {
        None
    } else if delta < Decimal::ZERO {
        Some((TransactionType::TransferOut, delta))
    } else {
        Some((TransactionType::TransferIn, delta))
    }
}

/// Receiving event whose storage scope names several source departments
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousScope {
    pub receiving_id: Uuid,
    pub target_department_id: Uuid,
    pub candidates: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillItemError {
    pub source_id: Uuid,
    pub message: String,
}

/// Outcome of one backfill run
#[derive(Debug, Clone, Serialize)]
pub struct BackfillSummary {
    pub job: String,
    pub mode: BackfillMode,
    pub candidates: usize,
    /// Entries posted (execute) or that would be posted (dry-run)
    pub patched: usize,
    pub skipped_reasons: BTreeMap<SkipReason, usize>,
    pub ambiguous: Vec<AmbiguousScope>,
    pub errors: Vec<BackfillItemError>,
    pub committed: bool,
    pub cancelled: bool,
}

impl BackfillSummary {
    pub fn new(job: &str, mode: BackfillMode) -> Self {
        Self {
            job: job.to_string(),
            mode,
            candidates: 0,
            patched: 0,
            skipped_reasons: BTreeMap::new(),
            ambiguous: Vec::new(),
            errors: Vec::new(),
            committed: false,
            cancelled: false,
        }
    }

    pub fn skip(&mut self, reason: SkipReason) {
        *self.skipped_reasons.entry(reason).or_default() += 1;
    }

    pub fn skipped(&self, reason: SkipReason) -> usize {
        self.skipped_reasons.get(&reason).copied().unwrap_or(0)
    }

    pub fn record_error(&mut self, source_id: Uuid, message: impl Into<String>) {
        self.errors.push(BackfillItemError {
            source_id,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// No further item runs once one failed or the run was cancelled, in
    /// either mode. A failed statement leaves the transaction unusable.
    pub fn halted(&self) -> bool {
        self.has_errors() || self.cancelled
    }
}
