//! HTTP handlers for recipe expansion and unit conversion lookups

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::Expansion;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::units::ConversionLookup;
use crate::services::{RecipeService, UnitService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExpandQuery {
    pub quantity: Decimal,
}

/// Ingredient usage for selling `quantity` of a menu item
pub async fn expand_recipe(
    State(state): State<AppState>,
    Path(menu_item_id): Path<Uuid>,
    Query(query): Query<ExpandQuery>,
) -> AppResult<Json<Expansion>> {
    let service = RecipeService::new(state.db);
    let expansion = service.expand(menu_item_id, query.quantity).await?;
    Ok(Json(expansion))
}

#[derive(Debug, Deserialize)]
pub struct ConversionQuery {
    pub from_unit_id: Uuid,
    pub to_unit_id: Uuid,
}

/// Multiplier between two units, if a path exists
pub async fn resolve_conversion(
    State(state): State<AppState>,
    Query(query): Query<ConversionQuery>,
) -> AppResult<Json<ConversionLookup>> {
    let service = UnitService::new(state.db);
    let lookup = service
        .resolve_conversion(query.from_unit_id, query.to_unit_id)
        .await?;
    Ok(Json(lookup))
}
