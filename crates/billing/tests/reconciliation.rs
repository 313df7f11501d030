//! End-to-end reconciliation behavior over the in-memory store and a
//! scripted provider. No network, no database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use inkline_billing::catalog::PlanCatalog;
use inkline_billing::customer::CustomerIdentityResolver;
use inkline_billing::limits::FeatureLimitEvaluator;
use inkline_billing::payments::PaymentHistorySyncEngine;
use inkline_billing::portal::BillingPortalIssuer;
use inkline_billing::provider::{
    ProviderClient, ProviderCustomer, ProviderInvoice, ProviderPortalSession, ProviderPrice,
    ProviderSubscription,
};
use inkline_billing::store::{BillingStore, HistoryFilter, MemoryStore};
use inkline_billing::subscription::{SubscriptionSyncEngine, SyncOutcome};
use inkline_billing::webhooks::WebhookDispatcher;
use inkline_billing::BillingResult;
use inkline_shared::{
    BillingInterval, FeatureLimits, Limit, PaymentStatus, Plan, PlanId, SubscriptionStatus, User,
    UserId,
};

#[derive(Default)]
struct FakeState {
    customers: HashMap<String, ProviderCustomer>,
    subscriptions: Vec<ProviderSubscription>,
    invoices: Vec<ProviderInvoice>,
    prices: HashMap<(String, String), ProviderPrice>,
    customers_created: u64,
}

/// Scripted stand-in for the payment provider. Tests mutate `state`
/// directly to simulate changes happening on the provider side.
#[derive(Default)]
struct FakeProvider {
    state: std::sync::Mutex<FakeState>,
}

impl FakeProvider {
    fn with_state(&self, f: impl FnOnce(&mut FakeState)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
    }

    fn customers_created(&self) -> u64 {
        self.state.lock().unwrap().customers_created
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<Option<ProviderCustomer>> {
        Ok(self.state.lock().unwrap().customers.get(customer_id).cloned())
    }

    async fn create_customer(
        &self,
        email: &str,
        _name: &str,
        _user_id: &str,
    ) -> BillingResult<ProviderCustomer> {
        let mut state = self.state.lock().unwrap();
        state.customers_created += 1;
        let customer = ProviderCustomer {
            id: format!("cus_fake_{}", state.customers_created),
            email: Some(email.to_string()),
        };
        state.customers.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<ProviderSubscription>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.customer_id == customer_id && s.status != SubscriptionStatus::Canceled)
            .cloned()
            .collect())
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let mut state = self.state.lock().unwrap();
        for sub in &mut state.subscriptions {
            if sub.id == subscription_id {
                sub.cancel_at_period_end = true;
                return Ok(sub.clone());
            }
        }
        Err(inkline_billing::BillingError::SubscriptionNotFound(
            subscription_id.to_string(),
        ))
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProviderInvoice>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .invoices
            .iter()
            .filter(|i| i.customer_id == customer_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_price(
        &self,
        product_id: &str,
        currency: &str,
    ) -> BillingResult<Option<ProviderPrice>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .prices
            .get(&(product_id.to_string(), currency.to_string()))
            .cloned())
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<ProviderPortalSession> {
        Ok(ProviderPortalSession {
            url: format!("https://portal.fake/{customer_id}?return={return_url}"),
        })
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn test_user(customer_id: Option<&str>) -> User {
    User {
        id: UserId::new(),
        email: "ada@example.test".to_string(),
        display_name: "Ada".to_string(),
        auth_provider_id: "auth0|ada".to_string(),
        provider_customer_id: customer_id.map(str::to_string),
        trial_start: None,
        trial_end: None,
        created_at: now(),
        updated_at: now(),
    }
}

fn pro_plan() -> Plan {
    Plan {
        id: PlanId::new(),
        name: "pro".to_string(),
        display_name: "Pro".to_string(),
        price_cents: 2_900,
        currency: "usd".to_string(),
        interval: BillingInterval::Monthly,
        provider_price_id: "price_pro_monthly".to_string(),
        provider_product_id: "prod_pro".to_string(),
        is_active: true,
        sort_order: 1,
        limits: FeatureLimits {
            documents: Limit::unlimited(),
            annotations: Limit::unlimited(),
            projects: Limit::max(25),
            api_access: true,
            export_enabled: true,
            version_history: true,
        },
    }
}

fn provider_sub(id: &str, customer_id: &str, price_id: &str) -> ProviderSubscription {
    ProviderSubscription {
        id: id.to_string(),
        customer_id: customer_id.to_string(),
        price_id: price_id.to_string(),
        status: SubscriptionStatus::Active,
        created: now(),
        current_period_start: Some(now()),
        current_period_end: Some(now() + time::Duration::days(30)),
        cancel_at_period_end: false,
        canceled_at: None,
        trial_start: None,
        trial_end: None,
    }
}

fn paid_invoice(id: &str, customer_id: &str, subscription_id: &str) -> ProviderInvoice {
    ProviderInvoice {
        id: id.to_string(),
        customer_id: customer_id.to_string(),
        subscription_id: Some(subscription_id.to_string()),
        payment_intent_id: Some(format!("pi_{id}")),
        amount_cents: 2_900,
        currency: "usd".to_string(),
        status: "paid".to_string(),
        hosted_invoice_url: None,
        pdf_url: None,
        paid_at: Some(now()),
        failed_at: None,
        failure_reason: None,
        metadata: serde_json::json!({}),
    }
}

struct Harness {
    provider: Arc<FakeProvider>,
    store: Arc<MemoryStore>,
    resolver: Arc<CustomerIdentityResolver>,
    subscriptions: Arc<SubscriptionSyncEngine>,
    payments: Arc<PaymentHistorySyncEngine>,
}

impl Harness {
    fn new() -> Self {
        let provider = Arc::new(FakeProvider::default());
        let store = Arc::new(MemoryStore::new());
        let provider_dyn: Arc<dyn ProviderClient> = provider.clone();
        let store_dyn: Arc<dyn BillingStore> = store.clone();
        let resolver = Arc::new(CustomerIdentityResolver::new(
            provider_dyn.clone(),
            store_dyn.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionSyncEngine::new(
            provider_dyn.clone(),
            store_dyn.clone(),
            resolver.clone(),
        ));
        let payments = Arc::new(PaymentHistorySyncEngine::new(
            provider_dyn,
            store_dyn,
            resolver.clone(),
        ));
        Self {
            provider,
            store,
            resolver,
            subscriptions,
            payments,
        }
    }

    fn webhooks(&self) -> WebhookDispatcher {
        WebhookDispatcher::new(
            self.store.clone() as Arc<dyn BillingStore>,
            self.subscriptions.clone(),
            self.payments.clone(),
        )
    }
}

#[tokio::test]
async fn concurrent_resolution_creates_one_customer() {
    let h = Harness::new();
    let user = test_user(None);
    let user_id = user.id;
    h.store.insert_user(user).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = h.resolver.clone();
        handles.push(tokio::spawn(async move { resolver.resolve(user_id).await }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(h.provider.customers_created(), 1);
    let stored = h.store.get_user(user_id).await.unwrap().provider_customer_id;
    assert_eq!(stored.as_deref(), Some(ids[0].as_str()));

    // Finished resolutions release their per-user lock entry
    assert_eq!(h.resolver.in_flight_resolutions().await, 0);
}

#[tokio::test]
async fn stale_customer_id_heals_without_error() {
    let h = Harness::new();
    // Stored id points at a customer the provider no longer has
    let user = test_user(Some("cus_deleted_long_ago"));
    let user_id = user.id;
    h.store.insert_user(user).await;

    let resolved = h.resolver.resolve(user_id).await.unwrap();

    assert_ne!(resolved, "cus_deleted_long_ago");
    assert_eq!(h.provider.customers_created(), 1);
    let stored = h.store.get_user(user_id).await.unwrap().provider_customer_id;
    assert_eq!(stored.as_deref(), Some(resolved.as_str()));
}

#[tokio::test]
async fn subscription_sync_is_idempotent() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.store.insert_plan(pro_plan()).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.subscriptions
            .push(provider_sub("sub_1", "cus_ada", "price_pro_monthly"));
    });

    let first = h.subscriptions.sync_from_provider(user_id).await.unwrap();
    let second = h.subscriptions.sync_from_provider(user_id).await.unwrap();

    let (SyncOutcome::Synced(a), SyncOutcome::Synced(b)) = (first, second) else {
        panic!("expected both syncs to produce a subscription");
    };
    // Same row, same bytes: the second run observed nothing new
    assert_eq!(a, b);
}

#[tokio::test]
async fn invoice_resync_keeps_local_row_identity() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.invoices.push(paid_invoice("in_1", "cus_ada", "sub_1"));
        s.invoices.push(paid_invoice("in_2", "cus_ada", "sub_1"));
    });

    let first = h.payments.sync_user_payments(user_id).await.unwrap();
    assert_eq!(first.synced, 2);
    assert_eq!(first.created, 2);
    assert_eq!(first.errors, 0);

    let before: Vec<_> = h
        .payments
        .get_history(user_id, &HistoryFilter::default())
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();

    let second = h.payments.sync_user_payments(user_id).await.unwrap();
    assert_eq!(second.synced, 2);
    assert_eq!(second.created, 0);

    let after: Vec<_> = h
        .payments
        .get_history(user_id, &HistoryFilter::default())
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();

    assert_eq!(h.store.payment_count().await, 2);
    for id in &before {
        assert!(after.contains(id));
    }
}

#[tokio::test]
async fn malformed_invoice_does_not_fail_the_batch() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.invoices.push(paid_invoice("in_good", "cus_ada", "sub_1"));
        let mut bad = paid_invoice("in_bad", "cus_ada", "sub_1");
        bad.status = "??".to_string();
        s.invoices.push(bad);
    });

    let report = h.payments.sync_user_payments(user_id).await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn unknown_price_writes_nothing() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.store.insert_plan(pro_plan()).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.subscriptions
            .push(provider_sub("sub_mystery", "cus_ada", "price_not_in_catalog"));
    });

    let outcome = h.subscriptions.sync_from_provider(user_id).await.unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::PlanUnavailable {
            price_id: "price_not_in_catalog".to_string()
        }
    );
    assert!(h.store.subscription_by_provider_id("sub_mystery").await.is_none());
    assert!(h.store.current_subscription(user_id).await.unwrap().is_none());
}

#[tokio::test]
async fn subscribe_cancel_lifecycle() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.store.insert_plan(pro_plan()).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.subscriptions
            .push(provider_sub("sub_1", "cus_ada", "price_pro_monthly"));
    });

    // Subscribe
    let SyncOutcome::Synced(subscription) =
        h.subscriptions.sync_from_provider(user_id).await.unwrap()
    else {
        panic!("expected a synced subscription");
    };
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert!(!subscription.cancel_at_period_end);

    // Cancel at period end: provider flag set, local row resynced
    let canceled = h
        .subscriptions
        .cancel_subscription(user_id, subscription.id)
        .await
        .unwrap();
    assert!(canceled.cancel_at_period_end);
    assert_eq!(canceled.status, SubscriptionStatus::Active);

    // The period lapses and the provider drops the subscription
    h.provider.with_state(|s| {
        for sub in &mut s.subscriptions {
            sub.status = SubscriptionStatus::Canceled;
        }
    });

    let outcome = h.subscriptions.sync_from_provider(user_id).await.unwrap();
    assert_eq!(outcome, SyncOutcome::NoSubscription);

    let row = h.store.subscription_by_provider_id("sub_1").await.unwrap();
    assert_eq!(row.status, SubscriptionStatus::Canceled);
    assert!(row.canceled_at.is_some());
}

#[tokio::test]
async fn cancel_applies_provider_state_even_when_price_left_the_catalog() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.store.insert_plan(pro_plan()).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.subscriptions
            .push(provider_sub("sub_1", "cus_ada", "price_pro_monthly"));
    });

    let SyncOutcome::Synced(subscription) =
        h.subscriptions.sync_from_provider(user_id).await.unwrap()
    else {
        panic!("expected a synced subscription");
    };

    // The provider migrates the subscription onto a price we never knew
    h.provider.with_state(|s| {
        for sub in &mut s.subscriptions {
            sub.price_id = "price_legacy_retired".to_string();
        }
    });

    let canceled = h
        .subscriptions
        .cancel_subscription(user_id, subscription.id)
        .await
        .unwrap();

    // The re-sync cannot map the price to a plan, but the caller still
    // sees the state the provider confirmed
    assert_eq!(canceled.id, subscription.id);
    assert!(canceled.cancel_at_period_end);

    let row = h.store.subscription_by_provider_id("sub_1").await.unwrap();
    assert!(row.cancel_at_period_end);
}

#[tokio::test]
async fn failed_invoice_keeps_failure_details() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        let mut voided = paid_invoice("in_void", "cus_ada", "sub_1");
        voided.status = "void".to_string();
        voided.paid_at = None;
        voided.failed_at = Some(now());
        voided.failure_reason = Some("Card declined".to_string());
        s.invoices.push(voided);
    });

    let report = h.payments.sync_user_payments(user_id).await.unwrap();
    assert_eq!(report.synced, 1);

    let records = h
        .payments
        .get_history(user_id, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(records[0].status, PaymentStatus::Failed);
    assert!(records[0].failed_at.is_some());
    assert_eq!(records[0].failure_reason.as_deref(), Some("Card declined"));
}

#[tokio::test]
async fn catalog_overlays_localized_prices_and_converts_the_rest() {
    let h = Harness::new();
    h.store.insert_plan(pro_plan()).await;

    let mut team = pro_plan();
    team.id = PlanId::new();
    team.name = "team".to_string();
    team.display_name = "Team".to_string();
    team.price_cents = 9_900;
    team.provider_price_id = "price_team_monthly".to_string();
    team.provider_product_id = "prod_team".to_string();
    team.sort_order = 2;
    h.store.insert_plan(team).await;

    // Only the pro product has a configured GBP price
    h.provider.with_state(|s| {
        s.prices.insert(
            ("prod_pro".to_string(), "gbp".to_string()),
            ProviderPrice {
                id: "price_pro_monthly_gbp".to_string(),
                product_id: "prod_pro".to_string(),
                currency: "gbp".to_string(),
                unit_amount_cents: 2_500,
            },
        );
    });

    let catalog = PlanCatalog::new(
        h.provider.clone() as Arc<dyn ProviderClient>,
        h.store.clone() as Arc<dyn BillingStore>,
    );

    // Base currency passes through untouched
    let us = catalog.list_plans("US").await.unwrap();
    assert_eq!(us[0].price_cents, 2_900);
    assert_eq!(us[0].currency, "usd");

    let gb = catalog.list_plans("GB").await.unwrap();
    assert_eq!(gb[0].name, "pro");
    assert_eq!(gb[0].price_cents, 2_500);
    assert_eq!(gb[0].currency, "gbp");
    assert_eq!(gb[0].provider_price_id, "price_pro_monthly_gbp");

    // Team had no GBP price: converted at the observed 2500/2900 ratio
    assert_eq!(gb[1].name, "team");
    assert_eq!(gb[1].price_cents, 8_534);
    assert_eq!(gb[1].currency, "gbp");
}

#[tokio::test]
async fn portal_url_scoped_to_billing_page() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
    });

    let issuer = BillingPortalIssuer::new(
        h.provider.clone() as Arc<dyn ProviderClient>,
        h.resolver.clone(),
        "https://app.inkline.test/".to_string(),
    );

    let url = issuer.create_portal_url(user_id).await.unwrap();
    assert!(url.contains("cus_ada"));
    assert!(url.contains("https://app.inkline.test/billing"));
}

#[tokio::test]
async fn webhook_events_trigger_resync_for_owning_user() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.store.insert_plan(pro_plan()).await;
    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.subscriptions
            .push(provider_sub("sub_1", "cus_ada", "price_pro_monthly"));
        s.invoices.push(paid_invoice("in_1", "cus_ada", "sub_1"));
    });

    let dispatcher = h.webhooks();

    dispatcher
        .handle("customer.subscription.created", "cus_ada")
        .await
        .unwrap();
    assert!(h.store.subscription_by_provider_id("sub_1").await.is_some());

    dispatcher.handle("invoice.paid", "cus_ada").await.unwrap();
    assert_eq!(h.store.payment_count().await, 1);

    // Unknown kinds and unknown customers are acknowledged, not errors
    dispatcher.handle("charge.refunded", "cus_ada").await.unwrap();
    dispatcher
        .handle("invoice.paid", "cus_nobody")
        .await
        .unwrap();
    assert_eq!(h.store.payment_count().await, 1);

    // Duplicate delivery is a no-op
    dispatcher
        .handle("customer.subscription.created", "cus_ada")
        .await
        .unwrap();
    dispatcher.handle("invoice.paid", "cus_ada").await.unwrap();
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn limits_follow_the_synced_subscription() {
    let h = Harness::new();
    let user = test_user(Some("cus_ada"));
    let user_id = user.id;
    h.store.insert_user(user).await;
    h.store.insert_plan(pro_plan()).await;

    let store_dyn: Arc<dyn BillingStore> = h.store.clone();
    let evaluator = FeatureLimitEvaluator::new(store_dyn);

    // No subscription yet: free tier caps apply
    let free = evaluator.check_limit(user_id, "documents", 3).await.unwrap();
    assert!(!free.allowed);
    assert_eq!(free.limit, Some(3));

    h.provider.with_state(|s| {
        s.customers.insert(
            "cus_ada".to_string(),
            ProviderCustomer {
                id: "cus_ada".to_string(),
                email: None,
            },
        );
        s.subscriptions
            .push(provider_sub("sub_1", "cus_ada", "price_pro_monthly"));
    });
    h.subscriptions.sync_from_provider(user_id).await.unwrap();

    let pro = evaluator
        .check_limit(user_id, "documents", 10_000_000)
        .await
        .unwrap();
    assert!(pro.allowed);
    assert_eq!(pro.limit, None);

    let api = evaluator.check_limit(user_id, "api_access", 0).await.unwrap();
    assert!(api.allowed);
}
