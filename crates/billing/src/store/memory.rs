//! In-memory billing store
//!
//! Backs the test suite and local development without a database. Same
//! observable semantics as [`super::PgStore`], including upsert
//! idempotency keyed on provider-assigned ids.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use inkline_shared::{
    PaymentRecord, PaymentStatus, Plan, PlanId, Subscription, SubscriptionId, SubscriptionStatus,
    User, UserId,
};

use crate::error::{BillingError, BillingResult};

use super::{
    BillingStore, HistoryFilter, PaymentTotals, PaymentUpsert, SubscriptionUpsert, UpsertOutcome,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    plans: Vec<Plan>,
    /// Keyed by provider_subscription_id
    subscriptions: HashMap<String, Subscription>,
    /// Keyed by provider_invoice_id
    payments: HashMap<String, PaymentRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user row
    pub async fn insert_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id.0, user);
    }

    /// Seed a plan row
    pub async fn insert_plan(&self, plan: Plan) {
        self.inner.write().await.plans.push(plan);
    }

    /// Snapshot a subscription by provider id (test inspection)
    pub async fn subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Option<Subscription> {
        self.inner
            .read()
            .await
            .subscriptions
            .get(provider_subscription_id)
            .cloned()
    }

    /// Number of stored payment records (test inspection)
    pub async fn payment_count(&self) -> usize {
        self.inner.read().await.payments.len()
    }
}

fn subscription_matches(existing: &Subscription, upsert: &SubscriptionUpsert) -> bool {
    existing.plan_id == upsert.plan_id
        && existing.provider_customer_id == upsert.provider_customer_id
        && existing.status == upsert.status
        && existing.current_period_start == upsert.current_period_start
        && existing.current_period_end == upsert.current_period_end
        && existing.cancel_at_period_end == upsert.cancel_at_period_end
        && existing.canceled_at == upsert.canceled_at
        && existing.trial_start == upsert.trial_start
        && existing.trial_end == upsert.trial_end
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn get_user(&self, user_id: UserId) -> BillingResult<User> {
        self.inner
            .read()
            .await
            .users
            .get(&user_id.0)
            .cloned()
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> BillingResult<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.provider_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn set_customer_id_if_absent(
        &self,
        user_id: UserId,
        customer_id: &str,
    ) -> BillingResult<String> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_id.0)
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;

        match &user.provider_customer_id {
            Some(winner) => Ok(winner.clone()),
            None => {
                user.provider_customer_id = Some(customer_id.to_string());
                user.updated_at = OffsetDateTime::now_utc();
                Ok(customer_id.to_string())
            }
        }
    }

    async fn clear_customer_id(&self, user_id: UserId) -> BillingResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&user_id.0) {
            user.provider_customer_id = None;
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn list_active_plans(&self) -> BillingResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .inner
            .read()
            .await
            .plans
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.name.cmp(&b.name)));
        Ok(plans)
    }

    async fn find_plan_by_price_id(&self, price_id: &str) -> BillingResult<Option<Plan>> {
        Ok(self
            .inner
            .read()
            .await
            .plans
            .iter()
            .find(|p| p.provider_price_id == price_id)
            .cloned())
    }

    async fn find_plan(&self, plan_id: PlanId) -> BillingResult<Option<Plan>> {
        Ok(self
            .inner
            .read()
            .await
            .plans
            .iter()
            .find(|p| p.id == plan_id)
            .cloned())
    }

    async fn upsert_subscription(
        &self,
        upsert: SubscriptionUpsert,
    ) -> BillingResult<Subscription> {
        let mut inner = self.inner.write().await;
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = inner.subscriptions.get_mut(&upsert.provider_subscription_id) {
            // No-op writes stay byte-identical so repeated syncs converge
            if !subscription_matches(existing, &upsert) {
                existing.plan_id = upsert.plan_id;
                existing.provider_customer_id = upsert.provider_customer_id;
                existing.status = upsert.status;
                existing.current_period_start = upsert.current_period_start;
                existing.current_period_end = upsert.current_period_end;
                existing.cancel_at_period_end = upsert.cancel_at_period_end;
                existing.canceled_at = upsert.canceled_at;
                existing.trial_start = upsert.trial_start;
                existing.trial_end = upsert.trial_end;
                existing.updated_at = now;
            }
            return Ok(existing.clone());
        }

        let subscription = Subscription {
            id: SubscriptionId::new(),
            user_id: upsert.user_id,
            plan_id: upsert.plan_id,
            provider_subscription_id: upsert.provider_subscription_id.clone(),
            provider_customer_id: upsert.provider_customer_id,
            status: upsert.status,
            current_period_start: upsert.current_period_start,
            current_period_end: upsert.current_period_end,
            cancel_at_period_end: upsert.cancel_at_period_end,
            canceled_at: upsert.canceled_at,
            trial_start: upsert.trial_start,
            trial_end: upsert.trial_end,
            created_at: now,
            updated_at: now,
        };
        inner
            .subscriptions
            .insert(upsert.provider_subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn current_subscription(&self, user_id: UserId) -> BillingResult<Option<Subscription>> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.status != SubscriptionStatus::Canceled)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn find_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .values()
            .find(|s| s.id == subscription_id)
            .cloned())
    }

    async fn supersede_active_except(
        &self,
        user_id: UserId,
        keep_provider_subscription_id: Option<&str>,
    ) -> BillingResult<u64> {
        let mut inner = self.inner.write().await;
        let now = OffsetDateTime::now_utc();
        let mut changed = 0;

        for sub in inner.subscriptions.values_mut() {
            if sub.user_id == user_id
                && sub.status != SubscriptionStatus::Canceled
                && keep_provider_subscription_id != Some(sub.provider_subscription_id.as_str())
            {
                sub.status = SubscriptionStatus::Canceled;
                sub.canceled_at.get_or_insert(now);
                sub.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn upsert_payment(&self, upsert: PaymentUpsert) -> BillingResult<UpsertOutcome> {
        let mut inner = self.inner.write().await;
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = inner.payments.get_mut(&upsert.provider_invoice_id) {
            existing.subscription_id = upsert.subscription_id;
            existing.provider_payment_intent_id = upsert.provider_payment_intent_id;
            existing.amount_cents = upsert.amount_cents;
            existing.currency = upsert.currency;
            existing.status = upsert.status;
            existing.hosted_invoice_url = upsert.hosted_invoice_url;
            existing.pdf_url = upsert.pdf_url;
            existing.paid_at = upsert.paid_at;
            existing.failed_at = upsert.failed_at;
            existing.failure_reason = upsert.failure_reason;
            existing.metadata = upsert.metadata;
            return Ok(UpsertOutcome::Updated);
        }

        let record = PaymentRecord {
            id: Uuid::new_v4(),
            user_id: upsert.user_id,
            subscription_id: upsert.subscription_id,
            provider_invoice_id: upsert.provider_invoice_id.clone(),
            provider_payment_intent_id: upsert.provider_payment_intent_id,
            amount_cents: upsert.amount_cents,
            currency: upsert.currency,
            status: upsert.status,
            hosted_invoice_url: upsert.hosted_invoice_url,
            pdf_url: upsert.pdf_url,
            paid_at: upsert.paid_at,
            failed_at: upsert.failed_at,
            failure_reason: upsert.failure_reason,
            metadata: upsert.metadata,
            created_at: now,
        };
        inner.payments.insert(upsert.provider_invoice_id, record);
        Ok(UpsertOutcome::Created)
    }

    async fn payment_history(
        &self,
        user_id: UserId,
        filter: &HistoryFilter,
    ) -> BillingResult<Vec<PaymentRecord>> {
        let limit = filter.limit.unwrap_or(20).clamp(1, 100) as usize;
        let offset = filter.offset.unwrap_or(0).max(0) as usize;

        let mut records: Vec<PaymentRecord> = self
            .inner
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .filter(|p| filter.status.map(|s| p.status == s).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn payment_totals(&self, user_id: UserId) -> BillingResult<PaymentTotals> {
        let inner = self.inner.read().await;
        let mut totals = PaymentTotals::default();
        for p in inner.payments.values().filter(|p| p.user_id == user_id) {
            match p.status {
                PaymentStatus::Succeeded => {
                    totals.succeeded_count += 1;
                    totals.total_paid_cents += p.amount_cents;
                }
                PaymentStatus::Failed => totals.failed_count += 1,
                _ => {}
            }
        }
        Ok(totals)
    }
}
