//! Sales pulled from the analytics feed and the references that deduplicate them

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{
    to_ledger_scale, Expansion, IngredientUsage, MissingConversion, NewLedgerEntry, RecipeCatalog,
    TransactionType, UsageAccumulator,
};

/// `reference_type` of deductions posted by the sales sync
pub const RECIPE_SALE_REFERENCE: &str = "recipe_sale";

const SALE_REFERENCE_VERSION: &str = "v1";
const NO_VALUE: &str = "-";

/// One aggregated sale row from the analytics source.
///
/// Daily aggregates carry neither `sold_at` nor `document_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub sale_date: NaiveDate,
    pub sold_at: Option<NaiveTime>,
    pub branch_id: Uuid,
    pub department_id: Option<Uuid>,
    pub menu_item_id: Uuid,
    pub quantity: Decimal,
    pub document_id: Option<String>,
}

/// Deterministic identity of one physical sale line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaleReference {
    pub date: NaiveDate,
    pub time_of_day: Option<NaiveTime>,
    pub branch_id: Uuid,
    pub department_id: Uuid,
    pub product_id: Uuid,
    pub document_id: Option<String>,
}

impl SaleReference {
    pub fn for_line(line: &SaleLine, department_id: Uuid) -> Self {
        Self {
            date: line.sale_date,
            // Sub-second precision never reaches the reference
            time_of_day: line
                .sold_at
                .and_then(|t| NaiveTime::from_hms_opt(t.hour(), t.minute(), t.second())),
            branch_id: line.branch_id,
            department_id,
            product_id: line.menu_item_id,
            document_id: line.document_id.clone().filter(|d| !d.is_empty()),
        }
    }
}

impl fmt::Display for SaleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self
            .time_of_day
            .map(|t| t.format("%H%M%S").to_string())
            .unwrap_or_else(|| NO_VALUE.to_string());
        let document = self
            .document_id
            .as_deref()
            .map(|d| urlencoding::encode(d).into_owned())
            .unwrap_or_else(|| NO_VALUE.to_string());

        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}",
            RECIPE_SALE_REFERENCE,
            SALE_REFERENCE_VERSION,
            self.date.format("%Y-%m-%d"),
            time,
            self.branch_id,
            self.department_id,
            self.product_id,
            document
        )
    }
}

/// A reference string that is not a well-formed sale reference
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed sale reference '{input}': {reason}")]
pub struct ReferenceParseError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for SaleReference {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ReferenceParseError {
            input: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split(':').collect();
        let [kind, version, date, time, branch, department, product, document] = parts[..] else {
            return Err(fail("expected 8 segments"));
        };
        if kind != RECIPE_SALE_REFERENCE {
            return Err(fail("not a recipe_sale reference"));
        }
        if version != SALE_REFERENCE_VERSION {
            return Err(fail("unsupported version"));
        }

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| fail("bad date"))?;
        let time_of_day = match time {
            NO_VALUE => None,
            t => Some(NaiveTime::parse_from_str(t, "%H%M%S").map_err(|_| fail("bad time"))?),
        };
        let parse_id = |v: &str| Uuid::parse_str(v).map_err(|_| fail("bad id"));
        let document_id = match document {
            NO_VALUE => None,
            d => Some(
                urlencoding::decode(d)
                    .map_err(|_| fail("bad document id"))?
                    .into_owned(),
            ),
        };

        Ok(Self {
            date,
            time_of_day,
            branch_id: parse_id(branch)?,
            department_id: parse_id(department)?,
            product_id: parse_id(product)?,
            document_id,
        })
    }
}

/// Deductions to post for one sale line, all under one reference
#[derive(Debug, Clone)]
pub struct SaleDeductionPlan {
    pub reference: SaleReference,
    pub reference_id: String,
    pub entries: Vec<NewLedgerEntry>,
}

impl SaleDeductionPlan {
    /// Split off entries whose ingredient already has a deduction under this
    /// reference. Returns the entries still to post and the number skipped.
    pub fn split_existing(&self, posted_products: &HashSet<Uuid>) -> (Vec<NewLedgerEntry>, usize) {
        let (done, pending): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .cloned()
            .partition(|e| posted_products.contains(&e.product_id));
        (pending, done.len())
    }

    pub fn department_id(&self) -> Uuid {
        self.reference.department_id
    }
}

/// Turn an expanded sale line into `sale` entries with negative quantities.
///
/// Quantities are rounded to the ledger scale. Usages that round to zero are
/// dropped since they would be no-op movements.
pub fn plan_sale_deductions(
    line: &SaleLine,
    department_id: Uuid,
    expansion: &Expansion,
) -> SaleDeductionPlan {
    let reference = SaleReference::for_line(line, department_id);
    let reference_id = reference.to_string();
    let notes = Some(format!(
        "ตัดสต็อกตามสูตร {} x {}",
        line.menu_item_id, line.quantity
    ));

    let entries = expansion
        .usages
        .iter()
        .map(|u| (u.ingredient_product_id, to_ledger_scale(u.quantity)))
        .filter(|(_, quantity)| !quantity.is_zero())
        .map(|(ingredient_product_id, quantity)| {
            NewLedgerEntry::new(
                ingredient_product_id,
                department_id,
                TransactionType::Sale,
                -quantity,
            )
            .with_reference(RECIPE_SALE_REFERENCE, reference_id.clone())
            .with_notes(notes.clone())
        })
        .collect();

    SaleDeductionPlan {
        reference,
        reference_id,
        entries,
    }
}

/// A sold menu item with no recipe on file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedSaleItem {
    pub menu_item_id: Uuid,
    pub quantity: Decimal,
}

/// A sale line whose deductions failed to post
#[derive(Debug, Clone, Serialize)]
pub struct FailedSaleLine {
    pub reference_id: String,
    pub message: String,
}

/// Outcome of one `sync_sales` run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub lines_fetched: usize,
    pub planned_deductions: usize,
    pub applied_deductions: usize,
    pub skipped_existing: usize,
    pub missing_conversions: Vec<MissingConversion>,
    pub unmatched_items: Vec<UnmatchedSaleItem>,
    /// Branches whose lines carried no department and have no default one
    pub unresolved_departments: Vec<Uuid>,
    pub expected_usage: Vec<IngredientUsage>,
    pub failed_lines: Vec<FailedSaleLine>,
    /// Lines with zero or negative quantity (voids, refunds), or quantities
    /// too large to expand
    pub ignored_lines: usize,
    pub cancelled: bool,
}

/// Everything a sync run intends to post, before touching the ledger
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub plans: Vec<SaleDeductionPlan>,
    pub report: SyncReport,
}

/// Expand raw sale lines into deduction plans.
///
/// Lines without a department fall back to their branch's default one. Lines
/// that land on the same reference are merged so a daily aggregate split
/// across pages is deducted once with the combined quantity.
pub fn plan_sync(
    lines: &[SaleLine],
    catalog: &RecipeCatalog,
    default_departments: &HashMap<Uuid, Uuid>,
) -> SyncPlan {
    let mut report = SyncReport {
        lines_fetched: lines.len(),
        ..SyncReport::default()
    };

    let mut merged: Vec<(Uuid, SaleLine)> = Vec::new();
    let mut index: HashMap<SaleReference, usize> = HashMap::new();
    for line in lines {
        let department = line
            .department_id
            .or_else(|| default_departments.get(&line.branch_id).copied());
        let Some(department_id) = department else {
            if !report.unresolved_departments.contains(&line.branch_id) {
                report.unresolved_departments.push(line.branch_id);
            }
            continue;
        };

        let reference = SaleReference::for_line(line, department_id);
        match index.get(&reference) {
            Some(&i) => match merged[i].1.quantity.checked_add(line.quantity) {
                Some(total) => merged[i].1.quantity = total,
                None => report.ignored_lines += 1,
            },
            None => {
                index.insert(reference, merged.len());
                merged.push((department_id, line.clone()));
            }
        }
    }
    report.unresolved_departments.sort();

    let mut usage = UsageAccumulator::new();
    let mut plans = Vec::new();
    for (department_id, line) in merged {
        if line.quantity <= Decimal::ZERO {
            report.ignored_lines += 1;
            continue;
        }
        let Some(expansion) = catalog.expand(line.menu_item_id, line.quantity) else {
            report.unmatched_items.push(UnmatchedSaleItem {
                menu_item_id: line.menu_item_id,
                quantity: line.quantity,
            });
            continue;
        };
        if expansion.overflowed || !usage.add(&expansion) {
            report.ignored_lines += 1;
            continue;
        }

        let plan = plan_sale_deductions(&line, department_id, &expansion);
        report.planned_deductions += plan.entries.len();
        plans.push(plan);
    }

    let (expected_usage, missing_conversions) = usage.into_parts();
    report.expected_usage = expected_usage;
    report.missing_conversions = missing_conversions;

    SyncPlan { plans, report }
}
