//! Ledger store: append-only movements and the per-key balance they maintain
//!
//! Every write locks the `inventory_balances` row of each key it touches
//! (`SELECT ... FOR UPDATE`) for the whole read-modify-write, taking locks in
//! ascending key order so multi-key writers never deadlock each other.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    apply_movement, audit_chain, lock_order, reverse_removed, to_ledger_scale,
    validate_date_range, validate_manual_reference, validate_movement,
    validate_reversal_confirmed, verify_entry, Balance, BalanceKey, ChainAudit, LedgerEntry,
    NewLedgerEntry, TransactionType,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::config::NegativeStockPolicy;
use crate::error::{AppError, AppResult};

const ENTRY_COLUMNS: &str = "id, product_id, department_id, transaction_type, quantity, \
     balance_before, balance_after, reference_type, reference_id, notes, created_by, created_at";

const BALANCE_COLUMNS: &str =
    "product_id, department_id, quantity, last_transaction_id, last_updated";

/// Ledger service for posting and reading stock movements
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
    negative_stock: NegativeStockPolicy,
}

/// Input for a manual movement entered by an operator
#[derive(Debug, Clone, Deserialize)]
pub struct ManualMovementInput {
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
}

/// Filter for the stock card
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<i64>,
}

/// Input for the destructive reversal escape hatch
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMovementsInput {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_reversal_type")]
    pub transaction_type: TransactionType,
    pub department_id: Option<Uuid>,
    pub reference_type: Option<String>,
    #[serde(default)]
    pub confirm: bool,
}

fn default_reversal_type() -> TransactionType {
    TransactionType::Sale
}

#[derive(Debug, Clone, Serialize)]
pub struct ReversalSummary {
    pub deleted_entries: usize,
    pub affected_balances: Vec<Balance>,
}

/// Balances locked by the current transaction
pub(crate) type LockedBalances = BTreeMap<BalanceKey, Balance>;

/// Lock one key's balance row, creating it at zero on first use
pub(crate) async fn lock_key(conn: &mut PgConnection, key: BalanceKey) -> AppResult<Balance> {
    sqlx::query(
        r#"
        INSERT INTO inventory_balances (product_id, department_id, quantity)
        VALUES ($1, $2, 0)
        ON CONFLICT (product_id, department_id) DO NOTHING
        "#,
    )
    .bind(key.product_id)
    .bind(key.department_id)
    .execute(&mut *conn)
    .await?;

    let balance = sqlx::query_as::<_, Balance>(&format!(
        "SELECT {} FROM inventory_balances WHERE product_id = $1 AND department_id = $2 FOR UPDATE",
        BALANCE_COLUMNS
    ))
    .bind(key.product_id)
    .bind(key.department_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(balance)
}

/// Lock every key in canonical order
pub(crate) async fn lock_keys<I>(conn: &mut PgConnection, keys: I) -> AppResult<LockedBalances>
where
    I: IntoIterator<Item = BalanceKey>,
{
    let mut locked = LockedBalances::new();
    for key in lock_order(keys) {
        let balance = lock_key(conn, key).await?;
        locked.insert(key, balance);
    }
    Ok(locked)
}

/// Append one entry against a balance this transaction already holds
async fn append_locked(
    conn: &mut PgConnection,
    balance: &mut Balance,
    entry: &NewLedgerEntry,
    policy: NegativeStockPolicy,
) -> AppResult<LedgerEntry> {
    let key = entry.key();
    let quantity = to_ledger_scale(entry.quantity);
    if quantity.is_zero() {
        return Err(AppError::validation(
            "quantity",
            "Quantity rounds to zero at ledger precision",
            "ปริมาณน้อยเกินกว่าที่ระบบบันทึกได้",
        ));
    }
    let balance_before = balance.quantity;
    let balance_after = apply_movement(key, balance_before, quantity)?;

    if !policy.permits(quantity, balance_after) {
        return Err(AppError::InsufficientStock(format!(
            "{} has {} on hand, {} requested",
            key, balance_before, -quantity
        )));
    }

    let posted = sqlx::query_as::<_, LedgerEntry>(&format!(
        r#"
        INSERT INTO inventory_transactions (
            product_id, department_id, transaction_type, quantity,
            balance_before, balance_after, reference_type, reference_id, notes, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        ENTRY_COLUMNS
    ))
    .bind(entry.product_id)
    .bind(entry.department_id)
    .bind(entry.transaction_type)
    .bind(quantity)
    .bind(balance_before)
    .bind(balance_after)
    .bind(&entry.reference_type)
    .bind(&entry.reference_id)
    .bind(&entry.notes)
    .bind(entry.created_by)
    .fetch_one(&mut *conn)
    .await?;

    // The stored row may have been rounded to the column scale
    verify_entry(&posted)?;
    if posted.balance_before != balance_before {
        return Err(AppError::InvariantViolation(format!(
            "entry {} on {} stored balance_before {} while lock held {}",
            posted.id, key, posted.balance_before, balance_before
        )));
    }

    let updated = sqlx::query_as::<_, Balance>(&format!(
        r#"
        UPDATE inventory_balances
        SET quantity = $3, last_transaction_id = $4, last_updated = NOW()
        WHERE product_id = $1 AND department_id = $2
        RETURNING {}
        "#,
        BALANCE_COLUMNS
    ))
    .bind(key.product_id)
    .bind(key.department_id)
    .bind(posted.balance_after)
    .bind(posted.id)
    .fetch_one(&mut *conn)
    .await?;

    *balance = updated;
    Ok(posted)
}

/// Append entries, in caller order, against balances locked by `lock_keys`
pub(crate) async fn append_all(
    conn: &mut PgConnection,
    locked: &mut LockedBalances,
    entries: &[NewLedgerEntry],
    policy: NegativeStockPolicy,
) -> AppResult<Vec<LedgerEntry>> {
    let mut posted = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = entry.key();
        let balance = locked
            .get_mut(&key)
            .ok_or_else(|| AppError::InvariantViolation(format!("lock not held for {}", key)))?;
        posted.push(append_locked(conn, balance, entry, policy).await?);
    }
    Ok(posted)
}

/// Lock every key touched by `entries`, then append them all
pub(crate) async fn post_batch_in(
    conn: &mut PgConnection,
    entries: &[NewLedgerEntry],
    policy: NegativeStockPolicy,
) -> AppResult<Vec<LedgerEntry>> {
    let mut locked = lock_keys(conn, entries.iter().map(NewLedgerEntry::key)).await?;
    append_all(conn, &mut locked, entries, policy).await
}

/// Product ids on `department_id` that already carry `reference_type`/`reference_id`
pub(crate) async fn posted_products(
    conn: &mut PgConnection,
    reference_type: &str,
    reference_id: &str,
    department_id: Uuid,
) -> AppResult<Vec<Uuid>> {
    let products = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT DISTINCT product_id FROM inventory_transactions
        WHERE reference_type = $1 AND reference_id = $2 AND department_id = $3
        "#,
    )
    .bind(reference_type)
    .bind(reference_id)
    .bind(department_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(products)
}

/// Net quantity posted to one key under a reference
pub(crate) async fn reference_net(
    conn: &mut PgConnection,
    key: BalanceKey,
    reference_type: &str,
    reference_id: &str,
) -> AppResult<Decimal> {
    let net = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(quantity), 0) FROM inventory_transactions
        WHERE product_id = $1 AND department_id = $2
          AND reference_type = $3 AND reference_id = $4
        "#,
    )
    .bind(key.product_id)
    .bind(key.department_id)
    .bind(reference_type)
    .bind(reference_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(net)
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            negative_stock: NegativeStockPolicy::default(),
        }
    }

    /// Policy for manual outbound movements
    pub fn with_negative_stock(mut self, policy: NegativeStockPolicy) -> Self {
        self.negative_stock = policy;
        self
    }

    /// Post one movement. The ledger does not check the sign of `quantity`.
    pub async fn post(&self, entry: NewLedgerEntry) -> AppResult<LedgerEntry> {
        let mut posted = self.post_batch(std::slice::from_ref(&entry)).await?;
        posted
            .pop()
            .ok_or_else(|| AppError::InvariantViolation("post returned no entry".to_string()))
    }

    /// Post a set of movements atomically
    pub async fn post_batch(&self, entries: &[NewLedgerEntry]) -> AppResult<Vec<LedgerEntry>> {
        let mut tx = self.db.begin().await?;
        let posted = post_batch_in(&mut *tx, entries, NegativeStockPolicy::Allow).await?;
        tx.commit().await?;
        Ok(posted)
    }

    /// Post an operator-entered movement after checking its sign convention
    pub async fn post_manual_movement(
        &self,
        actor: Option<Uuid>,
        input: ManualMovementInput,
    ) -> AppResult<LedgerEntry> {
        validate_movement(input.transaction_type, input.quantity).map_err(|msg| {
            AppError::validation("quantity", msg, "ปริมาณไม่ถูกต้องตามประเภทรายการ")
        })?;
        validate_manual_reference(input.reference_type.as_deref()).map_err(|msg| {
            AppError::validation("reference_type", msg, "ประเภทอ้างอิงนี้สงวนไว้สำหรับระบบ")
        })?;
        self.ensure_product_and_department(input.product_id, input.department_id)
            .await?;

        let mut entry = NewLedgerEntry::new(
            input.product_id,
            input.department_id,
            input.transaction_type,
            input.quantity,
        )
        .with_notes(input.notes)
        .created_by(actor);
        if let (Some(reference_type), Some(reference_id)) = (input.reference_type, input.reference_id)
        {
            entry = entry.with_reference(&reference_type, reference_id);
        }

        let mut tx = self.db.begin().await?;
        let mut posted = post_batch_in(&mut *tx, &[entry], self.negative_stock).await?;
        tx.commit().await?;

        let posted = posted
            .pop()
            .ok_or_else(|| AppError::InvariantViolation("post returned no entry".to_string()))?;
        tracing::info!(
            entry_id = posted.id,
            key = %posted.key(),
            transaction_type = %posted.transaction_type,
            quantity = %posted.quantity,
            balance_after = %posted.balance_after,
            "manual movement posted"
        );
        Ok(posted)
    }

    async fn ensure_product_and_department(&self, product_id: Uuid, department_id: Uuid) -> AppResult<()> {
        let (product_exists, department_exists) = sqlx::query_as::<_, (bool, bool)>(
            r#"
            SELECT EXISTS(SELECT 1 FROM products WHERE id = $1),
                   EXISTS(SELECT 1 FROM departments WHERE id = $2)
            "#,
        )
        .bind(product_id)
        .bind(department_id)
        .fetch_one(&self.db)
        .await?;

        if !product_exists {
            return Err(AppError::NotFound("Product".to_string()));
        }
        if !department_exists {
            return Err(AppError::NotFound("Department".to_string()));
        }
        Ok(())
    }

    /// Current balance, zero for a key that was never posted to
    pub async fn get_balance(&self, product_id: Uuid, department_id: Uuid) -> AppResult<Balance> {
        let balance = sqlx::query_as::<_, Balance>(&format!(
            "SELECT {} FROM inventory_balances WHERE product_id = $1 AND department_id = $2",
            BALANCE_COLUMNS
        ))
        .bind(product_id)
        .bind(department_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(balance.unwrap_or_else(|| Balance::empty(BalanceKey::new(product_id, department_id))))
    }

    /// All balances held by a department
    pub async fn list_balances(&self, department_id: Uuid) -> AppResult<Vec<Balance>> {
        let balances = sqlx::query_as::<_, Balance>(&format!(
            "SELECT {} FROM inventory_balances WHERE department_id = $1 ORDER BY product_id",
            BALANCE_COLUMNS
        ))
        .bind(department_id)
        .fetch_all(&self.db)
        .await?;
        Ok(balances)
    }

    /// Stock card: movements of one key in commit order
    pub async fn get_history(
        &self,
        product_id: Uuid,
        department_id: Uuid,
        query: HistoryQuery,
    ) -> AppResult<Vec<LedgerEntry>> {
        if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
            if end < start {
                return Err(AppError::validation(
                    "end_date",
                    "End date must not be before start date",
                    "วันที่สิ้นสุดต้องไม่อยู่ก่อนวันที่เริ่มต้น",
                ));
            }
        }
        let limit = query.limit.unwrap_or(500).clamp(1, 5000);

        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {} FROM inventory_transactions
            WHERE product_id = $1 AND department_id = $2
              AND ($3::date IS NULL OR (created_at AT TIME ZONE 'UTC')::date >= $3)
              AND ($4::date IS NULL OR (created_at AT TIME ZONE 'UTC')::date <= $4)
            ORDER BY id
            LIMIT $5
            "#,
            ENTRY_COLUMNS
        ))
        .bind(product_id)
        .bind(department_id)
        .bind(query.start_date)
        .bind(query.end_date)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(entries)
    }

    /// Balance implied by replaying entries with `id <= cursor`
    pub async fn balance_as_of(
        &self,
        product_id: Uuid,
        department_id: Uuid,
        cursor: i64,
    ) -> AppResult<Decimal> {
        let quantity = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(quantity), 0) FROM inventory_transactions
            WHERE product_id = $1 AND department_id = $2 AND id <= $3
            "#,
        )
        .bind(product_id)
        .bind(department_id)
        .bind(cursor)
        .fetch_one(&self.db)
        .await?;
        Ok(quantity)
    }

    /// Replay one key and compare it with its balance row
    pub async fn audit_key(&self, product_id: Uuid, department_id: Uuid) -> AppResult<ChainAudit> {
        let key = BalanceKey::new(product_id, department_id);

        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {} FROM inventory_transactions WHERE product_id = $1 AND department_id = $2 ORDER BY id",
            ENTRY_COLUMNS
        ))
        .bind(product_id)
        .bind(department_id)
        .fetch_all(&self.db)
        .await?;

        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT quantity FROM inventory_balances WHERE product_id = $1 AND department_id = $2",
        )
        .bind(product_id)
        .bind(department_id)
        .fetch_optional(&self.db)
        .await?;

        let audit = audit_chain(key, &entries, balance);
        if !audit.is_clean() {
            tracing::warn!(
                %key,
                breaks = audit.breaks.len(),
                balance_matches = audit.balance_matches,
                "ledger chain audit found drift"
            );
        }
        Ok(audit)
    }

    /// Delete movements in a date range and reverse their effect on balances.
    ///
    /// Admin-only escape hatch. This is the one path that removes ledger rows.
    pub async fn delete_movements_in_range(
        &self,
        actor: Option<Uuid>,
        input: DeleteMovementsInput,
    ) -> AppResult<ReversalSummary> {
        validate_reversal_confirmed(input.confirm)
            .map_err(|msg| AppError::validation("confirm", msg, "ต้องยืนยันการลบรายการเคลื่อนไหว"))?;
        validate_date_range(input.start_date, input.end_date)
            .map_err(|msg| AppError::validation("end_date", msg, "ช่วงวันที่ไม่ถูกต้อง"))?;

        let mut tx = self.db.begin().await?;

        let keys = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT DISTINCT product_id, department_id FROM inventory_transactions
            WHERE transaction_type = $1
              AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3
              AND ($4::uuid IS NULL OR department_id = $4)
              AND ($5::text IS NULL OR reference_type = $5)
            "#,
        )
        .bind(input.transaction_type)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.department_id)
        .bind(&input.reference_type)
        .fetch_all(&mut *tx)
        .await?;

        let locked = lock_keys(&mut *tx, keys.into_iter().map(|(p, d)| BalanceKey::new(p, d))).await?;
        let (products, departments): (Vec<Uuid>, Vec<Uuid>) = locked
            .keys()
            .map(|k| (k.product_id, k.department_id))
            .unzip();

        // Only keys locked above; rows for other keys may have arrived since
        let deleted = sqlx::query_as::<_, (Uuid, Uuid, Decimal)>(
            r#"
            DELETE FROM inventory_transactions
            WHERE transaction_type = $1
              AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3
              AND ($4::uuid IS NULL OR department_id = $4)
              AND ($5::text IS NULL OR reference_type = $5)
              AND (product_id, department_id) IN (
                  SELECT * FROM UNNEST($6::uuid[], $7::uuid[])
              )
            RETURNING product_id, department_id, quantity
            "#,
        )
        .bind(input.transaction_type)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.department_id)
        .bind(&input.reference_type)
        .bind(&products)
        .bind(&departments)
        .fetch_all(&mut *tx)
        .await?;

        let held: BTreeMap<BalanceKey, Decimal> =
            locked.iter().map(|(key, b)| (*key, b.quantity)).collect();
        let reversed_balances = reverse_removed(
            &held,
            deleted
                .iter()
                .map(|(p, d, quantity)| (BalanceKey::new(*p, *d), *quantity)),
        )?;

        let mut affected_balances = Vec::with_capacity(reversed_balances.len());
        for (key, reversed) in reversed_balances {
            let balance = sqlx::query_as::<_, Balance>(&format!(
                r#"
                UPDATE inventory_balances
                SET quantity = $3,
                    last_transaction_id = (
                        SELECT MAX(id) FROM inventory_transactions
                        WHERE product_id = $1 AND department_id = $2
                    ),
                    last_updated = NOW()
                WHERE product_id = $1 AND department_id = $2
                RETURNING {}
                "#,
                BALANCE_COLUMNS
            ))
            .bind(key.product_id)
            .bind(key.department_id)
            .bind(reversed)
            .fetch_one(&mut *tx)
            .await?;
            affected_balances.push(balance);
        }

        tx.commit().await?;

        tracing::warn!(
            actor = ?actor,
            deleted = deleted.len(),
            balances = affected_balances.len(),
            transaction_type = %input.transaction_type,
            start = %input.start_date,
            end = %input.end_date,
            "ledger movements deleted and balances reversed"
        );

        Ok(ReversalSummary {
            deleted_entries: deleted.len(),
            affected_balances,
        })
    }
}
