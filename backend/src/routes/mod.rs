//! Route definitions for the inventory ledger API

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - ledger movements and balances
        .nest("/inventory", inventory_routes(state.clone()))
        // Protected routes - external sales sync
        .nest("/sales-sync", sales_sync_routes(state.clone()))
        // Protected routes - stock checks
        .nest("/stock-checks", stock_check_routes(state.clone()))
        // Protected routes - production
        .nest("/production", production_routes(state.clone()))
        // Protected routes - recipes and units
        .nest("/recipes", recipe_routes(state.clone()))
        .nest("/units", unit_routes(state))
}

/// Ledger routes (protected)
fn inventory_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/movements", post(handlers::post_movement))
        .route("/movements/reversal", post(handlers::delete_movements))
        .route("/balances", get(handlers::list_balances))
        .route(
            "/balances/:product_id/:department_id",
            get(handlers::get_balance),
        )
        .route(
            "/balances/:product_id/:department_id/history",
            get(handlers::get_history),
        )
        .route(
            "/balances/:product_id/:department_id/as-of",
            get(handlers::get_balance_as_of),
        )
        .route(
            "/balances/:product_id/:department_id/audit",
            get(handlers::audit_balance),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Sales sync routes (protected)
fn sales_sync_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::sync_sales))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Stock check routes (protected)
fn stock_check_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/counts", post(handlers::record_count))
        .route("/variance", get(handlers::preview_variance))
        .route("/adjustments", post(handlers::apply_adjustment))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Production routes (protected)
fn production_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/transform", post(handlers::transform))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Recipe routes (protected)
fn recipe_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/:menu_item_id/expand", get(handlers::expand_recipe))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Unit routes (protected)
fn unit_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/conversion", get(handlers::resolve_conversion))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
