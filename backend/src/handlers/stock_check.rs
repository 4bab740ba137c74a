//! HTTP handlers for stock counts and variance adjustments

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use shared::{AdjustmentOutcome, PhysicalCount, VarianceItem};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::stock_check::{ApplyAdjustmentInput, RecordCountInput, StockCheckService};
use crate::AppState;

/// Record a physical count
pub async fn record_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RecordCountInput>,
) -> AppResult<Json<PhysicalCount>> {
    let service = StockCheckService::new(state.db);
    let count = service
        .record_count(Some(current_user.0.user_id), input)
        .await?;
    Ok(Json(count))
}

#[derive(Debug, Deserialize)]
pub struct VarianceQuery {
    pub check_date: NaiveDate,
    pub department_id: Uuid,
}

/// Preview variance for a department's counts on a date
pub async fn preview_variance(
    State(state): State<AppState>,
    Query(query): Query<VarianceQuery>,
) -> AppResult<Json<Vec<VarianceItem>>> {
    let service = StockCheckService::new(state.db);
    let items = service
        .preview_variance(query.check_date, query.department_id)
        .await?;
    Ok(Json(items))
}

/// Apply adjustments for the selected products
pub async fn apply_adjustment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ApplyAdjustmentInput>,
) -> AppResult<Json<AdjustmentOutcome>> {
    let service = StockCheckService::new(state.db);
    let outcome = service
        .apply_adjustment(Some(current_user.0.user_id), input)
        .await?;
    Ok(Json(outcome))
}
