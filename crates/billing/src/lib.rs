//! Billing and entitlement reconciliation for Inkline.
//!
//! The payment provider is the source of truth for money; this crate keeps
//! local entitlement state consistent with it through pull-based syncs
//! built on idempotent, provider-id-keyed upserts. Everything talks to the
//! provider through the [`provider::ProviderClient`] trait and to storage
//! through the [`store::BillingStore`] trait, so the engines are testable
//! without a network or a database.

pub mod catalog;
pub mod currency;
pub mod customer;
pub mod error;
pub mod limits;
pub mod payments;
pub mod portal;
pub mod provider;
pub mod store;
pub mod stripe;
pub mod subscription;
pub mod webhooks;

use std::sync::Arc;

pub use catalog::PlanCatalog;
pub use customer::CustomerIdentityResolver;
pub use error::{BillingError, BillingResult};
pub use limits::{FeatureLimitEvaluator, LimitCheckResult};
pub use payments::{BillingStats, PaymentHistorySyncEngine, PaymentSyncReport};
pub use portal::BillingPortalIssuer;
pub use provider::ProviderClient;
pub use store::{BillingStore, HistoryFilter, MemoryStore, PgStore};
pub use subscription::{SubscriptionSyncEngine, SyncOutcome};
pub use webhooks::WebhookDispatcher;

/// All billing engines wired over one provider client and one store.
pub struct BillingService {
    pub customers: Arc<CustomerIdentityResolver>,
    pub catalog: Arc<PlanCatalog>,
    pub subscriptions: Arc<SubscriptionSyncEngine>,
    pub payments: Arc<PaymentHistorySyncEngine>,
    pub limits: Arc<FeatureLimitEvaluator>,
    pub portal: Arc<BillingPortalIssuer>,
    pub webhooks: Arc<WebhookDispatcher>,
}

impl BillingService {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn BillingStore>,
        app_base_url: String,
    ) -> Self {
        let customers = Arc::new(CustomerIdentityResolver::new(
            provider.clone(),
            store.clone(),
        ));
        let catalog = Arc::new(PlanCatalog::new(provider.clone(), store.clone()));
        let subscriptions = Arc::new(SubscriptionSyncEngine::new(
            provider.clone(),
            store.clone(),
            customers.clone(),
        ));
        let payments = Arc::new(PaymentHistorySyncEngine::new(
            provider.clone(),
            store.clone(),
            customers.clone(),
        ));
        let limits = Arc::new(FeatureLimitEvaluator::new(store.clone()));
        let portal = Arc::new(BillingPortalIssuer::new(
            provider,
            customers.clone(),
            app_base_url,
        ));
        let webhooks = Arc::new(WebhookDispatcher::new(
            store,
            subscriptions.clone(),
            payments.clone(),
        ));

        Self {
            customers,
            catalog,
            subscriptions,
            payments,
            limits,
            portal,
            webhooks,
        }
    }
}
