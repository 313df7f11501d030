//! Public plan catalog routes

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use inkline_shared::Plan;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    /// ISO country code used to pick the display currency
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanInfo {
    pub name: String,
    pub display_name: String,
    pub price_cents: i64,
    pub currency: String,
    pub interval: String,
    pub limits: serde_json::Value,
}

impl From<Plan> for PlanInfo {
    fn from(plan: Plan) -> Self {
        Self {
            name: plan.name,
            display_name: plan.display_name,
            price_cents: plan.price_cents,
            currency: plan.currency,
            interval: plan.interval.to_string(),
            limits: serde_json::to_value(&plan.limits).unwrap_or_default(),
        }
    }
}

/// List purchasable plans priced for the caller's country. Public; the
/// response is cacheable for as long as the catalog cache itself lives.
pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let country = query.country.as_deref().unwrap_or("US");
    let plans = state.billing.catalog.list_plans(country).await?;
    let plans: Vec<PlanInfo> = plans.into_iter().map(PlanInfo::from).collect();

    Ok((
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(json!({ "plans": plans })),
    ))
}
