//! Feature limit enforcement
//!
//! Answers "may this user create one more X" from the locally cached
//! subscription row. Limit checks sit on hot request paths, so they never
//! trigger a provider round-trip; reconciliation keeps the cache honest.

use std::sync::Arc;

use serde::Serialize;

use inkline_shared::{FeatureLimits, Limit, UserId};

use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

const COUNTABLE_FEATURES: &[&str] = &["documents", "annotations", "projects"];
const TOGGLE_FEATURES: &[&str] = &["api_access", "export_enabled", "version_history"];

#[derive(Debug, Clone, Serialize)]
pub struct LimitCheckResult {
    pub allowed: bool,
    /// None when the plan grants unlimited use or the feature is a toggle
    pub limit: Option<i64>,
    pub usage: i64,
    pub message: Option<String>,
}

/// Evaluate a feature against a resolved set of limits.
pub fn evaluate(limits: &FeatureLimits, feature: &str, usage: i64) -> BillingResult<LimitCheckResult> {
    if let Some(limit) = limits.limit_for(feature) {
        return Ok(evaluate_countable(feature, limit, usage));
    }

    if TOGGLE_FEATURES.contains(&feature) {
        let enabled = limits.has_feature(feature);
        return Ok(LimitCheckResult {
            allowed: enabled,
            limit: None,
            usage,
            message: (!enabled)
                .then(|| format!("Your plan does not include {feature}. Upgrade to enable it.")),
        });
    }

    Err(BillingError::Validation(format!(
        "unknown feature '{feature}', expected one of {:?} or {:?}",
        COUNTABLE_FEATURES, TOGGLE_FEATURES
    )))
}

fn evaluate_countable(feature: &str, limit: Limit, usage: i64) -> LimitCheckResult {
    if limit.unlimited {
        return LimitCheckResult {
            allowed: true,
            limit: None,
            usage,
            message: None,
        };
    }

    let allowed = limit.allows(usage);
    LimitCheckResult {
        allowed,
        limit: Some(limit.max),
        usage,
        message: (!allowed).then(|| {
            format!(
                "You've reached your plan's limit of {} {feature}. Upgrade for more.",
                limit.max
            )
        }),
    }
}

pub struct FeatureLimitEvaluator {
    store: Arc<dyn BillingStore>,
}

impl FeatureLimitEvaluator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Resolve the limits currently in force for a user. Free-tier limits
    /// apply when there is no access-granting subscription.
    pub async fn limits_for_user(&self, user_id: UserId) -> BillingResult<FeatureLimits> {
        let Some(subscription) = self.store.current_subscription(user_id).await? else {
            return Ok(FeatureLimits::free_tier());
        };
        if !subscription.status.grants_access() {
            return Ok(FeatureLimits::free_tier());
        }
        match self.store.find_plan(subscription.plan_id).await? {
            Some(plan) => Ok(plan.limits),
            None => {
                tracing::warn!(
                    user_id = %user_id,
                    plan_id = %subscription.plan_id,
                    "subscription references missing plan, applying free tier"
                );
                Ok(FeatureLimits::free_tier())
            }
        }
    }

    pub async fn check_limit(
        &self,
        user_id: UserId,
        feature: &str,
        current_usage: i64,
    ) -> BillingResult<LimitCheckResult> {
        let limits = self.limits_for_user(user_id).await?;
        evaluate(&limits, feature, current_usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pro_limits() -> FeatureLimits {
        FeatureLimits {
            documents: Limit::unlimited(),
            annotations: Limit::unlimited(),
            projects: Limit::max(25),
            api_access: true,
            export_enabled: true,
            version_history: false,
        }
    }

    #[test]
    fn unlimited_allows_any_usage() {
        let result = evaluate(&pro_limits(), "documents", 10_000_000).unwrap();
        assert!(result.allowed);
        assert_eq!(result.limit, None);
    }

    #[test]
    fn usage_below_cap_allowed_at_cap_denied() {
        let limits = FeatureLimits {
            projects: Limit::max(5),
            ..FeatureLimits::free_tier()
        };
        assert!(evaluate(&limits, "projects", 4).unwrap().allowed);

        let denied = evaluate(&limits, "projects", 5).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, Some(5));
        assert!(denied.message.unwrap().contains("limit of 5"));
    }

    #[test]
    fn toggles_ignore_usage() {
        let result = evaluate(&pro_limits(), "api_access", 9999).unwrap();
        assert!(result.allowed);
        assert_eq!(result.limit, None);

        let denied = evaluate(&pro_limits(), "version_history", 0).unwrap();
        assert!(!denied.allowed);
        assert!(denied.message.is_some());
    }

    #[test]
    fn unknown_feature_is_a_validation_error() {
        let err = evaluate(&pro_limits(), "teleportation", 0).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn free_tier_denies_toggles() {
        let free = FeatureLimits::free_tier();
        assert!(!evaluate(&free, "export_enabled", 0).unwrap().allowed);
        assert!(evaluate(&free, "documents", 2).unwrap().allowed);
        assert!(!evaluate(&free, "documents", 3).unwrap().allowed);
    }
}
