//! Billing routes: sync triggers, payment history, stats, portal

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use inkline_billing::{BillingStats, HistoryFilter, SyncOutcome};
use inkline_shared::PaymentStatus;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Reconcile the caller's subscription with the payment provider.
///
/// A subscription on a price we have no plan for is not a failure: the
/// sync ran, there is just nothing to entitle, so we report success with
/// an explanatory message instead of a 5xx.
pub async fn sync_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .billing
        .subscriptions
        .sync_from_provider(auth_user.user_id)
        .await?;

    let body = match outcome {
        SyncOutcome::Synced(subscription) => json!({
            "success": true,
            "message": "Subscription synced",
            "subscription": subscription,
        }),
        SyncOutcome::NoSubscription => json!({
            "success": true,
            "message": "No active subscription",
            "subscription": null,
        }),
        SyncOutcome::PlanUnavailable { price_id } => json!({
            "success": true,
            "message": format!(
                "Subscription references an unavailable plan (price {price_id}); contact support"
            ),
            "subscription": null,
        }),
    };
    Ok(Json(body))
}

/// Pull the caller's recent invoices into local payment history
pub async fn sync_payments(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state
        .billing
        .payments
        .sync_user_payments(auth_user.user_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "synced": report.synced,
        "created": report.created,
        "errors": report.errors,
        "message": format!("Synced {} payment records", report.synced),
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn payment_history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<PaymentStatus>()
                .map_err(|_| ApiError::BadRequest(format!("unknown payment status '{raw}'")))
        })
        .transpose()?;

    let filter = HistoryFilter {
        status,
        limit: query.limit,
        offset: query.offset,
    };
    let records = state
        .billing
        .payments
        .get_history(auth_user.user_id, &filter)
        .await?;

    Ok(Json(json!({ "payments": records })))
}

pub async fn billing_stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<BillingStats>, ApiError> {
    let stats = state
        .billing
        .payments
        .get_billing_stats(auth_user.user_id)
        .await?;
    Ok(Json(stats))
}

/// Mint a hosted billing-portal session for the caller
pub async fn create_portal_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = state
        .billing
        .portal
        .create_portal_url(auth_user.user_id)
        .await?;
    Ok(Json(json!({ "url": url })))
}
