//! HTTP handlers for ledger movements and balances

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{Balance, ChainAudit, LedgerEntry};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::ledger::{
    DeleteMovementsInput, HistoryQuery, LedgerService, ManualMovementInput, ReversalSummary,
};
use crate::AppState;

fn ledger(state: &AppState) -> LedgerService {
    LedgerService::new(state.db.clone()).with_negative_stock(state.config.ledger.negative_stock)
}

/// Post a manual movement
pub async fn post_movement(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ManualMovementInput>,
) -> AppResult<Json<LedgerEntry>> {
    let entry = ledger(&state)
        .post_manual_movement(Some(current_user.0.user_id), input)
        .await?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
pub struct DepartmentQuery {
    pub department_id: Uuid,
}

/// List balances held by a department
pub async fn list_balances(
    State(state): State<AppState>,
    Query(query): Query<DepartmentQuery>,
) -> AppResult<Json<Vec<Balance>>> {
    let balances = ledger(&state).list_balances(query.department_id).await?;
    Ok(Json(balances))
}

/// Get the current balance of one product in one department
pub async fn get_balance(
    State(state): State<AppState>,
    Path((product_id, department_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Balance>> {
    let balance = ledger(&state).get_balance(product_id, department_id).await?;
    Ok(Json(balance))
}

/// Stock card for one product in one department
pub async fn get_history(
    State(state): State<AppState>,
    Path((product_id, department_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    let entries = ledger(&state)
        .get_history(product_id, department_id, query)
        .await?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    pub cursor: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceAsOf {
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub cursor: i64,
    pub quantity: Decimal,
}

/// Balance implied by the ledger up to a transaction id
pub async fn get_balance_as_of(
    State(state): State<AppState>,
    Path((product_id, department_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<CursorQuery>,
) -> AppResult<Json<BalanceAsOf>> {
    let quantity = ledger(&state)
        .balance_as_of(product_id, department_id, query.cursor)
        .await?;
    Ok(Json(BalanceAsOf {
        product_id,
        department_id,
        cursor: query.cursor,
        quantity,
    }))
}

/// Replay one key and report where it drifts
pub async fn audit_balance(
    State(state): State<AppState>,
    Path((product_id, department_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ChainAudit>> {
    let audit = ledger(&state).audit_key(product_id, department_id).await?;
    Ok(Json(audit))
}

/// Delete movements in a range and reverse their balances
pub async fn delete_movements(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<DeleteMovementsInput>,
) -> AppResult<Json<ReversalSummary>> {
    let summary = ledger(&state)
        .delete_movements_in_range(Some(current_user.0.user_id), input)
        .await?;
    Ok(Json(summary))
}
