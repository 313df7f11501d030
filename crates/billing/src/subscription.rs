//! Subscription reconciliation
//!
//! The provider is the source of truth for subscription state. The sync
//! engine pulls the user's subscriptions from the provider, picks the one
//! that matters, and makes the local mirror match it. All provider reads
//! happen before any local write, so a provider failure leaves local
//! state untouched.

use std::sync::Arc;

use inkline_shared::{Subscription, SubscriptionId, SubscriptionStatus, UserId};

use crate::customer::CustomerIdentityResolver;
use crate::error::{BillingError, BillingResult};
use crate::provider::{ProviderClient, ProviderSubscription};
use crate::store::{BillingStore, SubscriptionUpsert};

/// Result of one reconciliation pass for a user.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Local mirror now matches the provider subscription
    Synced(Subscription),
    /// Provider has no live subscription; local rows were marked canceled
    NoSubscription,
    /// Provider subscription references a price we have no plan for.
    /// Nothing was written locally.
    PlanUnavailable { price_id: String },
}

/// Pick the subscription that should drive local state when the provider
/// reports more than one. Access-granting statuses win over delinquent
/// ones; within a group the most recently created wins.
pub fn select_relevant(subs: &[ProviderSubscription]) -> Option<&ProviderSubscription> {
    let live: Vec<&ProviderSubscription> = subs
        .iter()
        .filter(|s| s.status != SubscriptionStatus::Canceled)
        .collect();

    if live.len() > 1 {
        tracing::warn!(
            count = live.len(),
            customer_id = %live[0].customer_id,
            "customer has multiple live provider subscriptions, picking most relevant"
        );
    }

    live.iter()
        .filter(|s| s.status.grants_access())
        .max_by_key(|s| s.created)
        .or_else(|| live.iter().max_by_key(|s| s.created))
        .copied()
}

pub struct SubscriptionSyncEngine {
    provider: Arc<dyn ProviderClient>,
    store: Arc<dyn BillingStore>,
    resolver: Arc<CustomerIdentityResolver>,
}

impl SubscriptionSyncEngine {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn BillingStore>,
        resolver: Arc<CustomerIdentityResolver>,
    ) -> Self {
        Self {
            provider,
            store,
            resolver,
        }
    }

    /// Reconcile a user's local subscription rows with the provider.
    pub async fn sync_from_provider(&self, user_id: UserId) -> BillingResult<SyncOutcome> {
        let customer_id = self.resolver.resolve(user_id).await?;
        let provider_subs = self.provider.list_subscriptions(&customer_id).await?;

        let Some(relevant) = select_relevant(&provider_subs) else {
            let superseded = self.store.supersede_active_except(user_id, None).await?;
            if superseded > 0 {
                tracing::info!(
                    user_id = %user_id,
                    superseded,
                    "provider reports no subscription, canceled local rows"
                );
            }
            return Ok(SyncOutcome::NoSubscription);
        };

        let Some(plan) = self.store.find_plan_by_price_id(&relevant.price_id).await? else {
            tracing::warn!(
                user_id = %user_id,
                price_id = %relevant.price_id,
                provider_subscription_id = %relevant.id,
                "provider subscription references unknown price, skipping sync"
            );
            return Ok(SyncOutcome::PlanUnavailable {
                price_id: relevant.price_id.clone(),
            });
        };

        let subscription = self
            .store
            .upsert_subscription(SubscriptionUpsert {
                user_id,
                plan_id: plan.id,
                provider_subscription_id: relevant.id.clone(),
                provider_customer_id: relevant.customer_id.clone(),
                status: relevant.status,
                current_period_start: relevant.current_period_start,
                current_period_end: relevant.current_period_end,
                cancel_at_period_end: relevant.cancel_at_period_end,
                canceled_at: relevant.canceled_at,
                trial_start: relevant.trial_start,
                trial_end: relevant.trial_end,
            })
            .await?;

        self.store
            .supersede_active_except(user_id, Some(&relevant.id))
            .await?;

        tracing::info!(
            user_id = %user_id,
            provider_subscription_id = %relevant.id,
            status = %relevant.status,
            "subscription synced"
        );
        Ok(SyncOutcome::Synced(subscription))
    }

    /// Schedule cancellation at the provider, then re-sync so the local
    /// row reflects whatever the provider actually recorded.
    pub async fn cancel_subscription(
        &self,
        user_id: UserId,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Subscription> {
        let subscription = self
            .store
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;

        // Ownership failures look identical to missing rows
        if subscription.user_id != user_id {
            return Err(BillingError::SubscriptionNotFound(
                subscription_id.to_string(),
            ));
        }

        let confirmed = self
            .provider
            .cancel_at_period_end(&subscription.provider_subscription_id)
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            "cancellation scheduled at period end"
        );

        match self.sync_from_provider(user_id).await? {
            SyncOutcome::Synced(updated) if updated.id == subscription_id => Ok(updated),
            // The sync could not refresh this row (another subscription was
            // more relevant, or the price no longer maps to a plan). The
            // provider confirmed the cancellation above, so apply that state
            // to the existing row directly instead of returning it stale.
            _ => {
                self.store
                    .upsert_subscription(SubscriptionUpsert {
                        user_id,
                        plan_id: subscription.plan_id,
                        provider_subscription_id: confirmed.id.clone(),
                        provider_customer_id: confirmed.customer_id.clone(),
                        status: confirmed.status,
                        current_period_start: confirmed.current_period_start,
                        current_period_end: confirmed.current_period_end,
                        cancel_at_period_end: confirmed.cancel_at_period_end,
                        canceled_at: confirmed.canceled_at,
                        trial_start: confirmed.trial_start,
                        trial_end: confirmed.trial_end,
                    })
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn ts(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).unwrap()
    }

    fn sub(id: &str, status: SubscriptionStatus, created: i64) -> ProviderSubscription {
        ProviderSubscription {
            id: id.to_string(),
            customer_id: "cus_1".to_string(),
            price_id: "price_1".to_string(),
            status,
            created: ts(created),
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            trial_start: None,
            trial_end: None,
        }
    }

    #[test]
    fn empty_list_selects_nothing() {
        assert!(select_relevant(&[]).is_none());
    }

    #[test]
    fn active_beats_past_due_regardless_of_age() {
        let subs = vec![
            sub("sub_old_active", SubscriptionStatus::Active, 100),
            sub("sub_new_pastdue", SubscriptionStatus::PastDue, 900),
        ];
        assert_eq!(select_relevant(&subs).unwrap().id, "sub_old_active");
    }

    #[test]
    fn ties_break_toward_most_recent() {
        let subs = vec![
            sub("sub_a", SubscriptionStatus::Active, 100),
            sub("sub_b", SubscriptionStatus::Trialing, 200),
        ];
        assert_eq!(select_relevant(&subs).unwrap().id, "sub_b");
    }

    #[test]
    fn delinquent_only_still_selects() {
        let subs = vec![
            sub("sub_a", SubscriptionStatus::Unpaid, 100),
            sub("sub_b", SubscriptionStatus::PastDue, 200),
        ];
        assert_eq!(select_relevant(&subs).unwrap().id, "sub_b");
    }

    #[test]
    fn canceled_rows_never_selected() {
        let subs = vec![sub("sub_a", SubscriptionStatus::Canceled, 900)];
        assert!(select_relevant(&subs).is_none());
    }
}
