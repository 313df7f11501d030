//! Common types used across Inkline

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ParseEnumError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Plan ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PlanId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Subscription ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Billing interval for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingInterval::Monthly => write!(f, "monthly"),
            BillingInterval::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for BillingInterval {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" | "month" => Ok(BillingInterval::Monthly),
            "yearly" | "year" | "annual" => Ok(BillingInterval::Yearly),
            other => Err(ParseEnumError::new("billing interval", other)),
        }
    }
}

/// Subscription status, mirrored verbatim from the payment provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Unpaid,
    Trialing,
}

impl SubscriptionStatus {
    /// Whether this status still grants access to paid features
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Canceled => write!(f, "canceled"),
            SubscriptionStatus::PastDue => write!(f, "past_due"),
            SubscriptionStatus::Unpaid => write!(f, "unpaid"),
            SubscriptionStatus::Trialing => write!(f, "trialing"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            other => Err(ParseEnumError::new("subscription status", other)),
        }
    }
}

/// Payment record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
    Pending,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Succeeded => write!(f, "succeeded"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" | "paid" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "pending" | "open" => Ok(PaymentStatus::Pending),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(ParseEnumError::new("payment status", other)),
        }
    }
}

// =============================================================================
// Feature Limits
// =============================================================================

/// A single per-resource cap: either a numeric maximum or unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default)]
    pub max: i64,
}

impl Limit {
    pub fn unlimited() -> Self {
        Self {
            unlimited: true,
            max: 0,
        }
    }

    pub fn max(max: i64) -> Self {
        Self {
            unlimited: false,
            max,
        }
    }

    /// Whether one more unit is allowed at the given current usage
    pub fn allows(&self, current_usage: i64) -> bool {
        self.unlimited || current_usage < self.max
    }
}

/// Per-plan feature limits: resource caps plus boolean feature toggles.
/// Stored as JSONB on the plan row; seeded by the provisioning process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLimits {
    pub documents: Limit,
    pub annotations: Limit,
    pub projects: Limit,
    #[serde(default)]
    pub api_access: bool,
    #[serde(default)]
    pub export_enabled: bool,
    #[serde(default)]
    pub version_history: bool,
}

impl FeatureLimits {
    /// Limits applied when a user has no subscription at all
    pub fn free_tier() -> Self {
        Self {
            documents: Limit::max(3),
            annotations: Limit::max(50),
            projects: Limit::max(1),
            api_access: false,
            export_enabled: false,
            version_history: false,
        }
    }

    /// Look up the cap for a named countable resource
    pub fn limit_for(&self, feature: &str) -> Option<Limit> {
        match feature {
            "documents" => Some(self.documents),
            "annotations" => Some(self.annotations),
            "projects" => Some(self.projects),
            _ => None,
        }
    }

    /// Check a boolean feature toggle
    pub fn has_feature(&self, feature: &str) -> bool {
        match feature {
            "api_access" => self.api_access,
            "export_enabled" => self.export_enabled,
            "version_history" => self.version_history,
            _ => false,
        }
    }
}

impl Default for FeatureLimits {
    fn default() -> Self {
        Self::free_tier()
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A local application user. `provider_customer_id` is nullable and
/// self-healing: the identity resolver clears it when the provider no
/// longer recognizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub auth_provider_id: String,
    pub provider_customer_id: Option<String>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A purchasable plan. Read-mostly; seeded by provisioning, never written
/// by the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub display_name: String,
    pub price_cents: i64,
    pub currency: String,
    pub interval: BillingInterval,
    pub provider_price_id: String,
    pub provider_product_id: String,
    pub is_active: bool,
    pub sort_order: i32,
    pub limits: FeatureLimits,
}

/// A local mirror of one provider subscription. Created and updated only
/// by the sync engine, keyed by `provider_subscription_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A local mirror of one provider invoice, keyed by `provider_invoice_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    pub provider_invoice_id: String,
    pub provider_payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub hosted_invoice_url: Option<String>,
    pub pdf_url: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
    pub failed_at: Option<OffsetDateTime>,
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// FromRow impls (string-typed enum columns, JSONB limits/metadata)
// =============================================================================

fn decode_enum<T: std::str::FromStr<Err = ParseEnumError>>(
    column: &str,
    value: String,
) -> Result<T, sqlx::Error> {
    value.parse().map_err(|e: ParseEnumError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for User {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: UserId(row.try_get("id")?),
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            auth_provider_id: row.try_get("auth_provider_id")?,
            provider_customer_id: row.try_get("provider_customer_id")?,
            trial_start: row.try_get("trial_start")?,
            trial_end: row.try_get("trial_end")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Plan {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let limits: serde_json::Value = row.try_get("limits")?;
        let limits: FeatureLimits =
            serde_json::from_value(limits).map_err(|e| sqlx::Error::ColumnDecode {
                index: "limits".to_string(),
                source: Box::new(e),
            })?;
        Ok(Self {
            id: PlanId(row.try_get("id")?),
            name: row.try_get("name")?,
            display_name: row.try_get("display_name")?,
            price_cents: row.try_get("price_cents")?,
            currency: row.try_get("currency")?,
            interval: decode_enum("billing_interval", row.try_get("billing_interval")?)?,
            provider_price_id: row.try_get("provider_price_id")?,
            provider_product_id: row.try_get("provider_product_id")?,
            is_active: row.try_get("is_active")?,
            sort_order: row.try_get("sort_order")?,
            limits,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Subscription {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: SubscriptionId(row.try_get("id")?),
            user_id: UserId(row.try_get("user_id")?),
            plan_id: PlanId(row.try_get("plan_id")?),
            provider_subscription_id: row.try_get("provider_subscription_id")?,
            provider_customer_id: row.try_get("provider_customer_id")?,
            status: decode_enum("status", row.try_get("status")?)?,
            current_period_start: row.try_get("current_period_start")?,
            current_period_end: row.try_get("current_period_end")?,
            cancel_at_period_end: row.try_get("cancel_at_period_end")?,
            canceled_at: row.try_get("canceled_at")?,
            trial_start: row.try_get("trial_start")?,
            trial_end: row.try_get("trial_end")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PaymentRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: UserId(row.try_get("user_id")?),
            subscription_id: row
                .try_get::<Option<Uuid>, _>("subscription_id")?
                .map(SubscriptionId),
            provider_invoice_id: row.try_get("provider_invoice_id")?,
            provider_payment_intent_id: row.try_get("provider_payment_intent_id")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            status: decode_enum("status", row.try_get("status")?)?,
            hosted_invoice_url: row.try_get("hosted_invoice_url")?,
            pdf_url: row.try_get("pdf_url")?,
            paid_at: row.try_get("paid_at")?,
            failed_at: row.try_get("failed_at")?,
            failure_reason: row.try_get("failure_reason")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
