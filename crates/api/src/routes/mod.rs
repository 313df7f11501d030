//! API routes

pub mod billing;
pub mod plans;
pub mod subscriptions;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/plans", get(plans::list_plans));

    let authed_routes = Router::new()
        .route(
            "/subscriptions/check-limits",
            post(subscriptions::check_limits),
        )
        .route(
            "/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route("/billing/sync-subscription", post(billing::sync_subscription))
        .route("/billing/sync-payments", post(billing::sync_payments))
        .route("/billing/payment-history", get(billing::payment_history))
        .route("/billing/stats", get(billing::billing_stats))
        .route("/billing/portal", post(billing::create_portal_session))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
