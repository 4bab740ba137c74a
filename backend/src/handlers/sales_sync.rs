//! HTTP handler for the external sales sync

use axum::{extract::State, Json};
use shared::SyncReport;

use crate::error::AppResult;
use crate::services::sales_sync::{SalesSyncService, SyncSalesInput};
use crate::AppState;

/// Pull sales for a window and post recipe deductions
pub async fn sync_sales(
    State(state): State<AppState>,
    Json(input): Json<SyncSalesInput>,
) -> AppResult<Json<SyncReport>> {
    let service = SalesSyncService::new(state.db.clone());
    let report = service
        .sync_sales(
            state.sales_source.as_ref(),
            &state.config.retry,
            input,
            &state.shutdown,
        )
        .await?;
    Ok(Json(report))
}
