//! Idempotent deduction of recipe ingredients for externally recorded sales
//!
//! Each sale line is posted in its own transaction under a deterministic
//! reference. A re-run of an overlapping window (or a resume after a crash)
//! only posts the ingredients that have no entry under that reference yet.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Deserialize;
use shared::{
    plan_sync, validate_date_range, FailedSaleLine, SaleDeductionPlan, SyncReport,
    RECIPE_SALE_REFERENCE,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::cancellation::CancellationFlag;
use super::ledger::{append_all, lock_keys, posted_products};
use super::RecipeService;
use crate::config::NegativeStockPolicy;
use crate::error::{AppError, AppResult};
use crate::external::{retry_with_classifier, RetryPolicy, SalesSource, SourceError};

#[derive(Clone)]
pub struct SalesSyncService {
    db: PgPool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSalesInput {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub branch_id: Option<Uuid>,
}

/// Result of posting one plan
struct PlanOutcome {
    applied: usize,
    skipped_existing: usize,
}

impl SalesSyncService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Pull sales for the window and post the deductions that are not yet in the ledger
    pub async fn sync_sales(
        &self,
        source: &dyn SalesSource,
        retry: &RetryPolicy,
        input: SyncSalesInput,
        cancel: &CancellationFlag,
    ) -> AppResult<SyncReport> {
        validate_date_range(input.start_date, input.end_date)
            .map_err(|msg| AppError::validation("end_date", msg, "ช่วงวันที่ไม่ถูกต้อง"))?;

        let lines = retry_with_classifier(retry, source.name(), SourceError::classify, || {
            source.fetch_sale_lines(input.start_date, input.end_date, input.branch_id)
        })
        .await?;

        let mut menu_items: Vec<Uuid> = lines.iter().map(|l| l.menu_item_id).collect();
        menu_items.sort();
        menu_items.dedup();
        let mut branches: Vec<Uuid> = lines
            .iter()
            .filter(|l| l.department_id.is_none())
            .map(|l| l.branch_id)
            .collect();
        branches.sort();
        branches.dedup();

        let catalog = RecipeService::new(self.db.clone())
            .load_catalog(&menu_items)
            .await?;
        let default_departments = self.default_departments(&branches).await?;

        let plan = plan_sync(&lines, &catalog, &default_departments);
        let mut report = plan.report;

        for sale in &plan.plans {
            if cancel.is_cancelled() {
                report.cancelled = true;
                tracing::warn!(reference_id = %sale.reference_id, "sales sync cancelled");
                break;
            }
            if sale.entries.is_empty() {
                continue;
            }

            match self.post_plan(sale).await {
                Ok(outcome) => {
                    report.applied_deductions += outcome.applied;
                    report.skipped_existing += outcome.skipped_existing;
                    tracing::debug!(
                        reference_id = %sale.reference_id,
                        applied = outcome.applied,
                        skipped = outcome.skipped_existing,
                        "sale line processed"
                    );
                }
                Err(AppError::DatabaseError(sqlx::Error::Database(db_err)))
                    if db_err.is_unique_violation() =>
                {
                    // Another writer posted the same reference first
                    report.skipped_existing += sale.entries.len();
                }
                Err(err) => {
                    tracing::error!(reference_id = %sale.reference_id, error = %err, "sale line failed");
                    report.failed_lines.push(FailedSaleLine {
                        reference_id: sale.reference_id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            start = %input.start_date,
            end = %input.end_date,
            branch = ?input.branch_id,
            lines = report.lines_fetched,
            planned = report.planned_deductions,
            applied = report.applied_deductions,
            skipped_existing = report.skipped_existing,
            missing_conversions = report.missing_conversions.len(),
            unmatched = report.unmatched_items.len(),
            failed = report.failed_lines.len(),
            cancelled = report.cancelled,
            "sales sync finished"
        );

        Ok(report)
    }

    async fn default_departments(&self, branch_ids: &[Uuid]) -> AppResult<HashMap<Uuid, Uuid>> {
        if branch_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT id, default_department_id FROM branches
            WHERE id = ANY($1) AND default_department_id IS NOT NULL
            "#,
        )
        .bind(branch_ids)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Post one sale line. The existence check runs after the key locks are
    /// taken, so concurrent runs over the same window cannot both post.
    async fn post_plan(&self, sale: &SaleDeductionPlan) -> AppResult<PlanOutcome> {
        let mut tx = self.db.begin().await?;

        let mut locked = lock_keys(&mut *tx, sale.entries.iter().map(|e| e.key())).await?;
        let posted: HashSet<Uuid> = posted_products(
            &mut *tx,
            RECIPE_SALE_REFERENCE,
            &sale.reference_id,
            sale.department_id(),
        )
        .await?
        .into_iter()
        .collect();

        let (pending, skipped_existing) = sale.split_existing(&posted);
        let applied = if pending.is_empty() {
            0
        } else {
            append_all(&mut *tx, &mut locked, &pending, NegativeStockPolicy::Allow)
                .await?
                .len()
        };

        tx.commit().await?;
        Ok(PlanOutcome {
            applied,
            skipped_existing,
        })
    }
}
