//! Stripe implementation of the provider boundary

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use stripe::{
    BillingPortalSession, Client, CreateBillingPortalSession, CreateCustomer, Currency, Customer,
    CustomerId, Invoice, InvoiceStatus, ListInvoices, ListPrices, ListSubscriptions, Price,
    Subscription, SubscriptionId, SubscriptionStatus as StripeSubStatus, UpdateSubscription,
};
use time::OffsetDateTime;

use inkline_shared::SubscriptionStatus;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    ProviderClient, ProviderCustomer, ProviderInvoice, ProviderPortalSession, ProviderPrice,
    ProviderSubscription,
};

/// Configuration for the Stripe provider
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Base URL the billing portal returns to
    pub app_base_url: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

/// Stripe-backed provider client
#[derive(Clone)]
pub struct StripeProvider {
    client: Client,
    config: StripeConfig,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
        customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::Provider(format!("Invalid customer ID: {}", e)))
    }
}

fn timestamp(secs: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs).ok()
}

fn map_status(status: StripeSubStatus) -> Option<SubscriptionStatus> {
    match status {
        StripeSubStatus::Active => Some(SubscriptionStatus::Active),
        StripeSubStatus::Trialing => Some(SubscriptionStatus::Trialing),
        StripeSubStatus::PastDue => Some(SubscriptionStatus::PastDue),
        StripeSubStatus::Unpaid => Some(SubscriptionStatus::Unpaid),
        StripeSubStatus::Canceled => Some(SubscriptionStatus::Canceled),
        // Incomplete checkout attempts and paused subscriptions are not
        // states the local mirror tracks
        StripeSubStatus::Incomplete
        | StripeSubStatus::IncompleteExpired
        | StripeSubStatus::Paused => None,
    }
}

fn expandable_id<T: stripe::Object>(e: &stripe::Expandable<T>) -> String
where
    T::Id: std::fmt::Display,
{
    match e {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(obj) => obj.id().to_string(),
    }
}

fn map_subscription(sub: Subscription) -> BillingResult<Option<ProviderSubscription>> {
    let status = match map_status(sub.status) {
        Some(status) => status,
        None => return Ok(None),
    };

    let price_id = sub
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|p| p.id.to_string())
        .ok_or_else(|| {
            BillingError::Provider(format!("Subscription {} has no price", sub.id))
        })?;

    Ok(Some(ProviderSubscription {
        id: sub.id.to_string(),
        customer_id: expandable_id(&sub.customer),
        price_id,
        status,
        created: timestamp(sub.created).unwrap_or_else(OffsetDateTime::now_utc),
        current_period_start: timestamp(sub.current_period_start),
        current_period_end: timestamp(sub.current_period_end),
        cancel_at_period_end: sub.cancel_at_period_end,
        canceled_at: sub.canceled_at.and_then(timestamp),
        trial_start: sub.trial_start.and_then(timestamp),
        trial_end: sub.trial_end.and_then(timestamp),
    }))
}

fn map_invoice(invoice: Invoice) -> Option<ProviderInvoice> {
    let customer_id = invoice.customer.as_ref().map(expandable_id)?;

    let status = match invoice.status {
        Some(InvoiceStatus::Paid) => "paid",
        Some(InvoiceStatus::Open) => "open",
        Some(InvoiceStatus::Draft) => "draft",
        Some(InvoiceStatus::Uncollectible) => "uncollectible",
        Some(InvoiceStatus::Void) => "void",
        None => "unknown",
    };

    let paid_at = invoice
        .status_transitions
        .as_ref()
        .and_then(|t| t.paid_at)
        .and_then(timestamp);

    let failed_at = invoice
        .status_transitions
        .as_ref()
        .and_then(|t| t.voided_at.or(t.marked_uncollectible_at))
        .and_then(timestamp);

    let failure_reason = invoice
        .last_finalization_error
        .as_ref()
        .and_then(|e| e.message.clone());

    Some(ProviderInvoice {
        id: invoice.id.to_string(),
        customer_id,
        subscription_id: invoice.subscription.as_ref().map(expandable_id),
        payment_intent_id: invoice.payment_intent.as_ref().map(expandable_id),
        // amount_paid reflects what was actually charged; fall back to the
        // invoice total for unpaid invoices
        amount_cents: invoice.amount_paid.filter(|a| *a > 0).or(invoice.total).unwrap_or(0),
        currency: invoice
            .currency
            .map(|c| c.to_string())
            .unwrap_or_else(|| "usd".to_string()),
        status: status.to_string(),
        hosted_invoice_url: invoice.hosted_invoice_url,
        pdf_url: invoice.invoice_pdf,
        paid_at,
        failed_at,
        failure_reason,
        metadata: invoice
            .metadata
            .map(|m| serde_json::to_value(m).unwrap_or_default())
            .unwrap_or_else(|| serde_json::json!({})),
    })
}

#[async_trait]
impl ProviderClient for StripeProvider {
    async fn retrieve_customer(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<ProviderCustomer>> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        match Customer::retrieve(&self.client, &customer_id, &[]).await {
            Ok(customer) => {
                if customer.deleted {
                    return Ok(None);
                }
                Ok(Some(ProviderCustomer {
                    id: customer.id.to_string(),
                    email: customer.email,
                }))
            }
            // A missing resource is the self-healing signal, not a failure
            Err(stripe::StripeError::Stripe(req_err))
                if req_err.http_status == 404
                    || req_err.code == Some(stripe::ErrorCode::ResourceMissing) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> BillingResult<ProviderCustomer> {
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("platform".to_string(), "inkline".to_string());

        let params = CreateCustomer {
            email: Some(email),
            name: Some(name),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(&self.client, params).await?;

        Ok(ProviderCustomer {
            id: customer.id.to_string(),
            email: customer.email,
        })
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<ProviderSubscription>> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let params = ListSubscriptions {
            customer: Some(customer_id),
            ..Default::default()
        };

        let subscriptions = Subscription::list(&self.client, &params).await?;

        let mut result = Vec::with_capacity(subscriptions.data.len());
        for sub in subscriptions.data {
            if let Some(mapped) = map_subscription(sub)? {
                // Canceled subscriptions are reported by the list endpoint
                // in some expansion modes; the engine only wants live ones
                if mapped.status != SubscriptionStatus::Canceled {
                    result.push(mapped);
                }
            }
        }
        Ok(result)
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let sub_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::Provider(format!("Invalid subscription ID: {}", e)))?;

        let mut params = UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);

        let subscription = Subscription::update(&self.client, &sub_id, params).await?;

        map_subscription(subscription)?.ok_or_else(|| {
            BillingError::Provider(format!(
                "Subscription {} entered an unexpected state after cancellation",
                subscription_id
            ))
        })
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProviderInvoice>> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let params = ListInvoices {
            customer: Some(customer_id),
            limit: Some(limit),
            ..Default::default()
        };

        let invoices = Invoice::list(&self.client, &params).await?;

        Ok(invoices.data.into_iter().filter_map(map_invoice).collect())
    }

    async fn find_price(
        &self,
        product_id: &str,
        currency: &str,
    ) -> BillingResult<Option<ProviderPrice>> {
        let currency = Currency::from_str(currency)
            .map_err(|_| BillingError::Validation(format!("Unknown currency: {}", currency)))?;

        let params = ListPrices {
            active: Some(true),
            currency: Some(currency),
            product: Some(stripe::IdOrCreate::Id(product_id)),
            ..Default::default()
        };

        let prices = Price::list(&self.client, &params).await?;

        Ok(prices.data.into_iter().next().map(|price| ProviderPrice {
            id: price.id.to_string(),
            product_id: product_id.to_string(),
            currency: price
                .currency
                .map(|c| c.to_string())
                .unwrap_or_else(|| currency.to_string()),
            unit_amount_cents: price.unit_amount.unwrap_or(0),
        }))
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<ProviderPortalSession> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params).await?;

        Ok(ProviderPortalSession { url: session.url })
    }
}
