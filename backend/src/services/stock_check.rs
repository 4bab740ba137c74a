//! Physical stock counts and operator-confirmed variance adjustments

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{
    evaluate_variance, latest_counts, validate_counted_quantity, AdjustmentDecision,
    AdjustmentOutcome, AppliedCount, BalanceKey, NewLedgerEntry, PhysicalCount, TransactionType,
    VarianceItem, STOCK_CHECK_REFERENCE,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::ledger::{append_all, lock_key, lock_keys};
use crate::config::NegativeStockPolicy;
use crate::error::{AppError, AppResult};

const COUNT_COLUMNS: &str = "id, department_id, product_id, check_date, counted_quantity, \
     system_quantity, ledger_cursor, counted_by, checked_at";

#[derive(Clone)]
pub struct StockCheckService {
    db: PgPool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordCountInput {
    pub department_id: Uuid,
    pub product_id: Uuid,
    pub check_date: NaiveDate,
    pub counted_quantity: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyAdjustmentInput {
    pub check_date: NaiveDate,
    pub department_id: Uuid,
    pub product_ids: Vec<Uuid>,
}

#[derive(Debug, FromRow)]
struct AppliedCountRow {
    product_id: Uuid,
    count_id: i64,
    check_date: NaiveDate,
}

/// Counts of this department that already carry an adjustment, per product
async fn applied_counts(
    conn: &mut PgConnection,
    department_id: Uuid,
    product_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<AppliedCount>>> {
    let rows = sqlx::query_as::<_, AppliedCountRow>(
        r#"
        SELECT DISTINCT sc.product_id, sc.id AS count_id, sc.check_date
        FROM stock_counts sc
        JOIN inventory_transactions t
          ON t.reference_type = $1
         AND t.reference_id = sc.id::text
         AND t.product_id = sc.product_id
         AND t.department_id = sc.department_id
        WHERE sc.department_id = $2 AND sc.product_id = ANY($3)
        "#,
    )
    .bind(STOCK_CHECK_REFERENCE)
    .bind(department_id)
    .bind(product_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut applied: HashMap<Uuid, Vec<AppliedCount>> = HashMap::new();
    for row in rows {
        applied.entry(row.product_id).or_default().push(AppliedCount {
            count_id: row.count_id,
            check_date: row.check_date,
        });
    }
    Ok(applied)
}

/// Latest count per product for one department and date
async fn counts_on(
    conn: &mut PgConnection,
    check_date: NaiveDate,
    department_id: Uuid,
    product_ids: Option<&[Uuid]>,
) -> AppResult<Vec<PhysicalCount>> {
    let counts = sqlx::query_as::<_, PhysicalCount>(&format!(
        r#"
        SELECT {} FROM stock_counts
        WHERE check_date = $1 AND department_id = $2
          AND ($3::uuid[] IS NULL OR product_id = ANY($3))
        "#,
        COUNT_COLUMNS
    ))
    .bind(check_date)
    .bind(department_id)
    .bind(product_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(latest_counts(counts))
}

fn evaluate_all(counts: &[PhysicalCount], applied: &HashMap<Uuid, Vec<AppliedCount>>) -> Vec<VarianceItem> {
    counts
        .iter()
        .map(|c| {
            let history = applied.get(&c.product_id).map(Vec::as_slice).unwrap_or(&[]);
            evaluate_variance(c, history)
        })
        .collect()
}

impl StockCheckService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Store a count together with the balance it is compared against
    pub async fn record_count(
        &self,
        actor: Option<Uuid>,
        input: RecordCountInput,
    ) -> AppResult<PhysicalCount> {
        validate_counted_quantity(input.counted_quantity).map_err(|msg| {
            AppError::validation("counted_quantity", msg, "จำนวนที่นับได้ต้องไม่ติดลบ")
        })?;

        let mut tx = self.db.begin().await?;
        let balance = lock_key(&mut *tx, BalanceKey::new(input.product_id, input.department_id)).await?;

        let count = sqlx::query_as::<_, PhysicalCount>(&format!(
            r#"
            INSERT INTO stock_counts (
                department_id, product_id, check_date, counted_quantity,
                system_quantity, ledger_cursor, counted_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            COUNT_COLUMNS
        ))
        .bind(input.department_id)
        .bind(input.product_id)
        .bind(input.check_date)
        .bind(input.counted_quantity)
        .bind(balance.quantity)
        .bind(balance.last_transaction_id)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            count_id = count.id,
            product_id = %count.product_id,
            department_id = %count.department_id,
            counted = %count.counted_quantity,
            system = %count.system_quantity,
            "stock count recorded"
        );
        Ok(count)
    }

    /// Variance of every product counted on `check_date` in a department
    pub async fn preview_variance(
        &self,
        check_date: NaiveDate,
        department_id: Uuid,
    ) -> AppResult<Vec<VarianceItem>> {
        let mut conn = self.db.acquire().await?;
        let counts = counts_on(&mut *conn, check_date, department_id, None).await?;
        let products: Vec<Uuid> = counts.iter().map(|c| c.product_id).collect();
        let applied = applied_counts(&mut *conn, department_id, &products).await?;
        Ok(evaluate_all(&counts, &applied))
    }

    /// Post adjustments for the selected products.
    ///
    /// Chronology is re-evaluated under the key locks, so an adjustment
    /// applied concurrently for a later date still blocks this one.
    pub async fn apply_adjustment(
        &self,
        actor: Option<Uuid>,
        input: ApplyAdjustmentInput,
    ) -> AppResult<AdjustmentOutcome> {
        let selected: Vec<Uuid> = input
            .product_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if selected.is_empty() {
            return Err(AppError::validation(
                "product_ids",
                "Select at least one product",
                "กรุณาเลือกสินค้าอย่างน้อยหนึ่งรายการ",
            ));
        }

        let mut outcome = AdjustmentOutcome::default();
        let mut tx = self.db.begin().await?;

        let counts = counts_on(&mut *tx, input.check_date, input.department_id, Some(selected.as_slice())).await?;
        outcome.skipped_not_counted = selected
            .iter()
            .filter(|p| !counts.iter().any(|c| c.product_id == **p))
            .copied()
            .collect();

        let mut locked = lock_keys(
            &mut *tx,
            counts
                .iter()
                .map(|c| BalanceKey::new(c.product_id, c.department_id)),
        )
        .await?;
        let applied = applied_counts(&mut *tx, input.department_id, &selected).await?;

        let notes = Some(format!("ปรับยอดจากการตรวจนับ {}", input.check_date));
        let mut entries = Vec::new();
        for item in evaluate_all(&counts, &applied) {
            let decision = item.decision();
            outcome.record(decision);
            match decision {
                AdjustmentDecision::Apply(variance) => entries.push(
                    NewLedgerEntry::new(
                        item.product_id,
                        item.department_id,
                        TransactionType::Adjustment,
                        variance,
                    )
                    .with_reference(STOCK_CHECK_REFERENCE, item.count_id.to_string())
                    .with_notes(notes.clone())
                    .created_by(actor),
                ),
                AdjustmentDecision::SkipNewerApplied => {
                    tracing::info!(
                        count_id = item.count_id,
                        product_id = %item.product_id,
                        "count superseded by a later applied adjustment"
                    );
                }
                AdjustmentDecision::SkipAlreadyApplied | AdjustmentDecision::SkipZeroVariance => {}
            }
        }

        let posted = append_all(&mut *tx, &mut locked, &entries, NegativeStockPolicy::Allow).await?;
        outcome.entry_ids = posted.iter().map(|e| e.id).collect();
        tx.commit().await?;

        tracing::info!(
            department_id = %input.department_id,
            check_date = %input.check_date,
            applied = outcome.total_adjustments,
            skipped_already_applied = outcome.skipped_already_applied,
            skipped_newer_applied = outcome.skipped_newer_applied,
            skipped_zero_variance = outcome.skipped_zero_variance,
            not_counted = outcome.skipped_not_counted.len(),
            "stock adjustments applied"
        );
        Ok(outcome)
    }
}
