//! Webhook-driven resyncs
//!
//! Incoming provider events never carry state we trust directly; they are
//! a hint that the owning user's mirror is stale. Each recognized event
//! kind maps to the corresponding pull-based sync, which is an idempotent
//! upsert, so duplicate deliveries are harmless.

use std::sync::Arc;

use inkline_shared::UserId;

use crate::error::BillingResult;
use crate::payments::PaymentHistorySyncEngine;
use crate::store::BillingStore;
use crate::subscription::SubscriptionSyncEngine;

/// What a recognized event kind asks us to refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncTarget {
    Subscription,
    Payments,
}

fn target_for_event(event_kind: &str) -> Option<SyncTarget> {
    match event_kind {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted"
        | "customer.subscription.trial_will_end" => Some(SyncTarget::Subscription),
        "invoice.paid"
        | "invoice.payment_succeeded"
        | "invoice.payment_failed"
        | "invoice.finalized"
        | "invoice.voided"
        | "invoice.marked_uncollectible" => Some(SyncTarget::Payments),
        _ => None,
    }
}

pub struct WebhookDispatcher {
    store: Arc<dyn BillingStore>,
    subscriptions: Arc<SubscriptionSyncEngine>,
    payments: Arc<PaymentHistorySyncEngine>,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn BillingStore>,
        subscriptions: Arc<SubscriptionSyncEngine>,
        payments: Arc<PaymentHistorySyncEngine>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            payments,
        }
    }

    /// Handle one delivered event. Unknown kinds and events for customers
    /// we don't know are logged and dropped, never an error to the caller.
    pub async fn handle(&self, event_kind: &str, customer_id: &str) -> BillingResult<()> {
        let Some(target) = target_for_event(event_kind) else {
            tracing::debug!(event_kind = %event_kind, "ignoring unhandled webhook event kind");
            return Ok(());
        };

        let Some(user) = self.store.find_user_by_customer_id(customer_id).await? else {
            tracing::warn!(
                event_kind = %event_kind,
                customer_id = %customer_id,
                "webhook for unknown customer, dropping"
            );
            return Ok(());
        };

        self.sync(target, user.id).await
    }

    async fn sync(&self, target: SyncTarget, user_id: UserId) -> BillingResult<()> {
        match target {
            SyncTarget::Subscription => {
                self.subscriptions.sync_from_provider(user_id).await?;
            }
            SyncTarget::Payments => {
                self.payments.sync_user_payments(user_id).await?;
            }
        }
        Ok(())
    }
}
