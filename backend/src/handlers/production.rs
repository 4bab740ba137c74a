//! HTTP handler for production transforms

use axum::{extract::State, Json};
use shared::{ProductionRequest, ProductionResult};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::ProductionService;
use crate::AppState;

/// Consume ingredients and produce one output
pub async fn transform(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ProductionRequest>,
) -> AppResult<Json<ProductionResult>> {
    let service = ProductionService::new(state.db, state.config.ledger.negative_stock);
    let result = service
        .transform(Some(current_user.0.user_id), request)
        .await?;
    Ok(Json(result))
}
