//! Payment-provider abstraction
//!
//! The reconciliation engine only ever talks to the provider through this
//! trait, and provider responses are converted into the typed DTOs below at
//! this boundary. Tests substitute a scripted fake; production wires in
//! [`crate::stripe::StripeProvider`].

use async_trait::async_trait;
use time::OffsetDateTime;

use inkline_shared::SubscriptionStatus;

use crate::error::BillingResult;

/// A provider-side customer record
#[derive(Debug, Clone)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// A provider-side subscription, already normalized at the boundary.
/// Period/trial bounds and flags are authoritative; the engine copies them
/// verbatim and never computes them locally.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub price_id: String,
    pub status: SubscriptionStatus,
    pub created: OffsetDateTime,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
}

/// A provider-side invoice. Amounts are integer minor units taken verbatim
/// from the provider response.
#[derive(Debug, Clone)]
pub struct ProviderInvoice {
    pub id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    /// Raw provider status string; mapped to `PaymentStatus` during sync
    pub status: String,
    pub hosted_invoice_url: Option<String>,
    pub pdf_url: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
    pub failed_at: Option<OffsetDateTime>,
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
}

/// A provider-side price for one product in one currency
#[derive(Debug, Clone)]
pub struct ProviderPrice {
    pub id: String,
    pub product_id: String,
    pub currency: String,
    pub unit_amount_cents: i64,
}

/// A hosted billing-portal session
#[derive(Debug, Clone)]
pub struct ProviderPortalSession {
    pub url: String,
}

/// The provider API surface the engine consumes. Any payment provider with
/// these primitives suffices.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Retrieve a customer. `Ok(None)` means the provider does not know the
    /// id (deleted, or from a different sandbox/live environment) — the
    /// signal the identity resolver uses for self-healing. Transport and
    /// server failures are `Err`.
    async fn retrieve_customer(&self, customer_id: &str)
        -> BillingResult<Option<ProviderCustomer>>;

    /// Create a new customer carrying the local user id in metadata
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> BillingResult<ProviderCustomer>;

    /// List the customer's subscriptions in non-canceled, non-expired states
    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<ProviderSubscription>>;

    /// Request cancellation at period end and return the resulting state
    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription>;

    /// List the customer's invoices, most recent first
    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProviderInvoice>>;

    /// Find a product's price in a specific currency, if one is configured
    async fn find_price(
        &self,
        product_id: &str,
        currency: &str,
    ) -> BillingResult<Option<ProviderPrice>>;

    /// Create a hosted billing-portal session for a customer
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<ProviderPortalSession>;
}
