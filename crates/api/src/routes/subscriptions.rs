//! Subscription routes

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use inkline_billing::LimitCheckResult;
use inkline_shared::SubscriptionId;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CheckLimitsRequest {
    pub feature: String,
    #[serde(default)]
    pub current_usage: i64,
}

/// Check whether the caller may use more of a feature
pub async fn check_limits(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CheckLimitsRequest>,
) -> Result<Json<LimitCheckResult>, ApiError> {
    if req.current_usage < 0 {
        return Err(ApiError::BadRequest(
            "current_usage must be non-negative".to_string(),
        ));
    }

    let result = state
        .billing
        .limits
        .check_limit(auth_user.user_id, &req.feature, req.current_usage)
        .await?;
    Ok(Json(result))
}

/// Schedule cancellation of the caller's subscription at period end
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let subscription = state
        .billing
        .subscriptions
        .cancel_subscription(auth_user.user_id, SubscriptionId::from(subscription_id))
        .await?;

    Ok(Json(json!({ "subscription": subscription })))
}
