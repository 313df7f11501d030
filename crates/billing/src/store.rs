//! Storage abstraction for the reconciliation engine
//!
//! Everything the engine persists goes through [`BillingStore`]. The
//! production implementation is [`postgres::PgStore`]; [`memory::MemoryStore`]
//! backs tests and local development.

use async_trait::async_trait;
use time::OffsetDateTime;

use inkline_shared::{
    PaymentRecord, PaymentStatus, Plan, PlanId, Subscription, SubscriptionId, SubscriptionStatus,
    User, UserId,
};

use crate::error::BillingResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Provider-authoritative subscription fields written during a sync.
/// Everything here except `user_id`/`plan_id` is copied verbatim from the
/// provider response.
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
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
}

/// Payment fields written during an invoice sync, keyed by
/// `provider_invoice_id`
#[derive(Debug, Clone)]
pub struct PaymentUpsert {
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
}

/// Whether an upsert inserted a new row or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Filters for the payment-history query
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub status: Option<PaymentStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Aggregate payment totals for one user
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PaymentTotals {
    pub total_paid_cents: i64,
    pub succeeded_count: i64,
    pub failed_count: i64,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Users / customer identity
    async fn get_user(&self, user_id: UserId) -> BillingResult<User>;

    async fn find_user_by_customer_id(&self, customer_id: &str) -> BillingResult<Option<User>>;

    /// Persist a freshly-created provider customer id unless another writer
    /// got there first. Returns the id that actually ended up stored — the
    /// caller must use the returned value, not its own argument.
    async fn set_customer_id_if_absent(
        &self,
        user_id: UserId,
        customer_id: &str,
    ) -> BillingResult<String>;

    /// Drop a stale provider customer id so resolution can recreate it
    async fn clear_customer_id(&self, user_id: UserId) -> BillingResult<()>;

    // Plans (read-only here; seeded by provisioning)
    async fn list_active_plans(&self) -> BillingResult<Vec<Plan>>;

    /// Resolve a plan by provider price id, including inactive plans so that
    /// users on deprecated pricing still resolve
    async fn find_plan_by_price_id(&self, price_id: &str) -> BillingResult<Option<Plan>>;

    async fn find_plan(&self, plan_id: PlanId) -> BillingResult<Option<Plan>>;

    // Subscriptions
    async fn upsert_subscription(&self, upsert: SubscriptionUpsert)
        -> BillingResult<Subscription>;

    /// The user's most recent non-canceled subscription, if any
    async fn current_subscription(&self, user_id: UserId) -> BillingResult<Option<Subscription>>;

    async fn find_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Option<Subscription>>;

    /// Mark any locally-active rows CANCELED except the one the provider
    /// still reports (pass `None` to cancel all). Returns rows changed.
    async fn supersede_active_except(
        &self,
        user_id: UserId,
        keep_provider_subscription_id: Option<&str>,
    ) -> BillingResult<u64>;

    // Payments
    async fn upsert_payment(&self, upsert: PaymentUpsert) -> BillingResult<UpsertOutcome>;

    async fn payment_history(
        &self,
        user_id: UserId,
        filter: &HistoryFilter,
    ) -> BillingResult<Vec<PaymentRecord>>;

    async fn payment_totals(&self, user_id: UserId) -> BillingResult<PaymentTotals>;
}
