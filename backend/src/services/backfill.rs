//! Historical backfill jobs
//!
//! Both jobs are safe to re-run: a receiving event is only posted when it has
//! no entry under its reference, and transfers only post the remaining delta.
//! Execute mode runs every item in one transaction and rolls it back if any
//! item fails. Every key of the window is resolved first and locked once in
//! canonical order, so a run never holds one balance lock while waiting on
//! another.

use shared::{
    backfill_lock_order, resolve_source_department, transfer_delta, AmbiguousScope, BackfillMode,
    BackfillSummary, BackfillTarget, BalanceKey, DateRange, NewLedgerEntry, ReceivingEvent,
    SkipReason, SourceResolution, TransactionType, ORDER_RECEIVE_REFERENCE,
    RECEIVE_TRANSFER_REFERENCE,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::cancellation::CancellationFlag;
use super::ledger::{append_all, lock_keys, posted_products, reference_net, LockedBalances};
use crate::config::NegativeStockPolicy;
use crate::error::AppResult;

/// Which backfill to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillJob {
    /// `receive` entries for receiving events missing from the ledger
    Receiving,
    /// Balancing transfers on each receiving event's internal source department
    Transfers,
}

impl BackfillJob {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillJob::Receiving => "receiving",
            BackfillJob::Transfers => "receive_transfers",
        }
    }
}

#[derive(Clone)]
pub struct BackfillService {
    db: PgPool,
}

/// What one item contributed to the summary
enum ItemOutcome {
    Patched,
    Skipped(SkipReason),
    Ambiguous(Vec<Uuid>),
}

/// An event resolved to the keys it touches, or settled without touching any
type Resolution = Result<BackfillTarget, ItemOutcome>;

impl BackfillService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn receiving_events(
        conn: &mut PgConnection,
        range: &DateRange,
    ) -> AppResult<Vec<ReceivingEvent>> {
        let events = sqlx::query_as::<_, ReceivingEvent>(
            r#"
            SELECT r.id, r.product_id, r.department_id, p.product_group_id,
                   r.quantity, r.received_at
            FROM order_receivings r
            JOIN products p ON p.id = r.product_id
            WHERE r.received_at >= $1::date AND r.received_at < $2::date
            ORDER BY r.received_at, r.id
            "#,
        )
        .bind(range.start)
        .bind(range.end_exclusive())
        .fetch_all(&mut *conn)
        .await?;
        Ok(events)
    }

    /// Run one job over `range`. Cancellation is checked between items.
    pub async fn run(
        &self,
        kind: BackfillJob,
        range: DateRange,
        mode: BackfillMode,
        cancel: &CancellationFlag,
    ) -> AppResult<BackfillSummary> {
        let job = kind.as_str();
        let mut summary = BackfillSummary::new(job, mode);
        let mut tx = self.db.begin().await?;

        let events = Self::receiving_events(&mut *tx, &range).await?;
        summary.candidates = events.len();
        tracing::info!(job, %mode, start = %range.start, end = %range.end, candidates = events.len(), "backfill started");

        let mut resolved: Vec<(&ReceivingEvent, Resolution)> = Vec::with_capacity(events.len());
        for event in &events {
            match resolve(&mut *tx, kind, event).await {
                Ok(resolution) => resolved.push((event, resolution)),
                Err(err) => {
                    tracing::error!(job, receiving_id = %event.id, error = %err, "backfill item failed");
                    summary.record_error(event.id, err.to_string());
                    break;
                }
            }
        }

        let mut locked = LockedBalances::new();
        if mode.writes() && !summary.has_errors() {
            let keys = backfill_lock_order(resolved.iter().filter_map(|(_, r)| r.as_ref().ok()));
            tracing::debug!(job, keys = keys.len(), "locking backfill keys");
            locked = lock_keys(&mut *tx, keys).await?;
        }

        for (event, resolution) in resolved {
            if summary.halted() {
                break;
            }
            if cancel.is_cancelled() {
                summary.cancelled = true;
                tracing::warn!(job, receiving_id = %event.id, "backfill cancelled");
                break;
            }

            let outcome = match resolution {
                Err(settled) => Ok(settled),
                Ok(BackfillTarget::Receive(key)) => {
                    receiving_item(&mut *tx, &mut locked, event, key, mode).await
                }
                Ok(BackfillTarget::Transfer { target, source }) => {
                    transfer_item(&mut *tx, &mut locked, event, target, source, mode).await
                }
            };
            match outcome {
                Ok(ItemOutcome::Patched) => {
                    summary.patched += 1;
                    tracing::debug!(job, receiving_id = %event.id, "patched");
                }
                Ok(ItemOutcome::Skipped(reason)) => {
                    summary.skip(reason);
                    tracing::debug!(job, receiving_id = %event.id, reason = reason.as_str(), "skipped");
                }
                Ok(ItemOutcome::Ambiguous(candidates)) => {
                    summary.skip(SkipReason::AmbiguousSource);
                    tracing::warn!(job, receiving_id = %event.id, candidates = candidates.len(), "ambiguous storage scope");
                    summary.ambiguous.push(AmbiguousScope {
                        receiving_id: event.id,
                        target_department_id: event.department_id,
                        candidates,
                    });
                }
                Err(err) => {
                    tracing::error!(job, receiving_id = %event.id, error = %err, "backfill item failed");
                    summary.record_error(event.id, err.to_string());
                }
            }
        }

        if mode.writes() && !summary.has_errors() && !summary.cancelled {
            tx.commit().await?;
            summary.committed = true;
        } else {
            tx.rollback().await?;
        }

        tracing::info!(
            job,
            %mode,
            candidates = summary.candidates,
            patched = summary.patched,
            errors = summary.errors.len(),
            ambiguous = summary.ambiguous.len(),
            committed = summary.committed,
            cancelled = summary.cancelled,
            "backfill finished"
        );
        Ok(summary)
    }
}

/// Keys an event will touch, or the outcome when it needs no write
async fn resolve(
    conn: &mut PgConnection,
    kind: BackfillJob,
    event: &ReceivingEvent,
) -> AppResult<Resolution> {
    let target = BalanceKey::new(event.product_id, event.department_id);
    match kind {
        BackfillJob::Receiving if event.quantity <= Decimal::ZERO => {
            Ok(Err(ItemOutcome::Skipped(SkipReason::NonPositiveQuantity)))
        }
        BackfillJob::Receiving => Ok(Ok(BackfillTarget::Receive(target))),
        BackfillJob::Transfers => {
            let Some(group_id) = event.product_group_id else {
                return Ok(Err(ItemOutcome::Skipped(SkipReason::NoProductGroup)));
            };

            let candidates = sqlx::query_scalar::<_, Uuid>(
                r#"
                SELECT source_department_id FROM storage_scopes
                WHERE product_group_id = $1 AND target_department_id = $2
                "#,
            )
            .bind(group_id)
            .bind(event.department_id)
            .fetch_all(&mut *conn)
            .await?;

            Ok(match resolve_source_department(event.department_id, &candidates) {
                SourceResolution::Single(source) => Ok(BackfillTarget::Transfer {
                    target,
                    source: BalanceKey::new(event.product_id, source),
                }),
                SourceResolution::NoScope => Err(ItemOutcome::Skipped(SkipReason::NoInternalSource)),
                SourceResolution::Ambiguous(found) => Err(ItemOutcome::Ambiguous(found)),
            })
        }
    }
}

async fn receiving_item(
    conn: &mut PgConnection,
    locked: &mut LockedBalances,
    event: &ReceivingEvent,
    key: BalanceKey,
    mode: BackfillMode,
) -> AppResult<ItemOutcome> {
    let reference_id = event.id.to_string();
    let posted = posted_products(&mut *conn, ORDER_RECEIVE_REFERENCE, &reference_id, key.department_id).await?;
    if posted.contains(&key.product_id) {
        return Ok(ItemOutcome::Skipped(SkipReason::AlreadyPosted));
    }

    if mode.writes() {
        let entry = NewLedgerEntry::new(
            key.product_id,
            key.department_id,
            TransactionType::Receive,
            event.quantity,
        )
        .with_reference(ORDER_RECEIVE_REFERENCE, reference_id)
        .with_notes(Some(format!("ย้อนหลังรับสินค้า {}", event.received_at.date_naive())));
        append_all(&mut *conn, locked, &[entry], NegativeStockPolicy::Allow).await?;
    }
    Ok(ItemOutcome::Patched)
}

async fn transfer_item(
    conn: &mut PgConnection,
    locked: &mut LockedBalances,
    event: &ReceivingEvent,
    target: BalanceKey,
    source: BalanceKey,
    mode: BackfillMode,
) -> AppResult<ItemOutcome> {
    let reference_id = event.id.to_string();
    let target_net = reference_net(&mut *conn, target, ORDER_RECEIVE_REFERENCE, &reference_id).await?;
    let source_net =
        reference_net(&mut *conn, source, RECEIVE_TRANSFER_REFERENCE, &reference_id).await?;

    let Some((transaction_type, delta)) = transfer_delta(target_net, source_net) else {
        return Ok(ItemOutcome::Skipped(SkipReason::AlreadyBalanced));
    };

    if mode.writes() {
        let entry = NewLedgerEntry::new(source.product_id, source.department_id, transaction_type, delta)
            .with_reference(RECEIVE_TRANSFER_REFERENCE, reference_id)
            .with_notes(Some(format!("โอนเข้าคลัง {} ย้อนหลัง", target.department_id)));
        append_all(&mut *conn, locked, &[entry], NegativeStockPolicy::Allow).await?;
    }
    Ok(ItemOutcome::Patched)
}
