//! Payment history sync and billing stats
//!
//! Invoices are pulled from the provider and mirrored locally keyed by
//! invoice id, so webhook delivery and manual sync can both run without
//! creating duplicates. One malformed invoice never fails the batch.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use inkline_shared::{BillingInterval, PaymentRecord, PaymentStatus, UserId};

use crate::customer::CustomerIdentityResolver;
use crate::error::BillingResult;
use crate::provider::{ProviderClient, ProviderInvoice};
use crate::store::{BillingStore, HistoryFilter, PaymentUpsert, UpsertOutcome};

/// How many invoices one sync pass pulls from the provider
const INVOICE_SYNC_LIMIT: u64 = 100;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PaymentSyncReport {
    /// Invoices successfully mirrored (created or refreshed)
    pub synced: u64,
    /// Subset of `synced` that created a new local row
    pub created: u64,
    /// Invoices skipped because they could not be interpreted
    pub errors: u64,
}

/// Denormalized summary for the account billing page
#[derive(Debug, Clone, Serialize)]
pub struct BillingStats {
    pub total_paid_cents: i64,
    pub succeeded_count: i64,
    pub failed_count: i64,
    pub next_billing_date: Option<OffsetDateTime>,
    pub plan_name: Option<String>,
    pub plan_price_cents: Option<i64>,
    pub plan_interval: Option<BillingInterval>,
}

/// Interpret the provider's raw invoice status. Unknown statuses are an
/// error so new provider states surface in the sync report instead of
/// being silently misfiled.
fn payment_status_for_invoice(raw: &str) -> Option<PaymentStatus> {
    match raw {
        "paid" => Some(PaymentStatus::Succeeded),
        "open" | "draft" => Some(PaymentStatus::Pending),
        "uncollectible" | "void" => Some(PaymentStatus::Failed),
        _ => None,
    }
}

pub struct PaymentHistorySyncEngine {
    provider: Arc<dyn ProviderClient>,
    store: Arc<dyn BillingStore>,
    resolver: Arc<CustomerIdentityResolver>,
}

impl PaymentHistorySyncEngine {
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

    /// Mirror the user's recent provider invoices into local payment
    /// records. Amounts are copied verbatim, never recomputed.
    pub async fn sync_user_payments(&self, user_id: UserId) -> BillingResult<PaymentSyncReport> {
        let customer_id = self.resolver.resolve(user_id).await?;
        let invoices = self
            .provider
            .list_invoices(&customer_id, INVOICE_SYNC_LIMIT)
            .await?;

        // Link invoices to the local row of the subscription they bill for
        let current = self.store.current_subscription(user_id).await?;

        let mut report = PaymentSyncReport::default();
        for invoice in invoices {
            match self.upsert_invoice(user_id, &invoice, current.as_ref()).await {
                Ok(outcome) => {
                    report.synced += 1;
                    if outcome == UpsertOutcome::Created {
                        report.created += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        user_id = %user_id,
                        invoice_id = %invoice.id,
                        error = %err,
                        "skipping invoice that failed to sync"
                    );
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            user_id = %user_id,
            synced = report.synced,
            created = report.created,
            errors = report.errors,
            "payment history synced"
        );
        Ok(report)
    }

    async fn upsert_invoice(
        &self,
        user_id: UserId,
        invoice: &ProviderInvoice,
        current: Option<&inkline_shared::Subscription>,
    ) -> BillingResult<UpsertOutcome> {
        let status = payment_status_for_invoice(&invoice.status).ok_or_else(|| {
            crate::error::BillingError::Validation(format!(
                "unrecognized invoice status '{}'",
                invoice.status
            ))
        })?;

        let subscription_id = match (&invoice.subscription_id, current) {
            (Some(provider_sub_id), Some(sub))
                if *provider_sub_id == sub.provider_subscription_id =>
            {
                Some(sub.id)
            }
            _ => None,
        };

        self.store
            .upsert_payment(PaymentUpsert {
                user_id,
                subscription_id,
                provider_invoice_id: invoice.id.clone(),
                provider_payment_intent_id: invoice.payment_intent_id.clone(),
                amount_cents: invoice.amount_cents,
                currency: invoice.currency.clone(),
                status,
                hosted_invoice_url: invoice.hosted_invoice_url.clone(),
                pdf_url: invoice.pdf_url.clone(),
                paid_at: invoice.paid_at,
                failed_at: invoice.failed_at,
                failure_reason: invoice.failure_reason.clone(),
                metadata: invoice.metadata.clone(),
            })
            .await
    }

    /// Locally stored history, newest first
    pub async fn get_history(
        &self,
        user_id: UserId,
        filter: &HistoryFilter,
    ) -> BillingResult<Vec<PaymentRecord>> {
        self.store.payment_history(user_id, filter).await
    }

    pub async fn get_billing_stats(&self, user_id: UserId) -> BillingResult<BillingStats> {
        let totals = self.store.payment_totals(user_id).await?;
        let current = self.store.current_subscription(user_id).await?;

        let mut stats = BillingStats {
            total_paid_cents: totals.total_paid_cents,
            succeeded_count: totals.succeeded_count,
            failed_count: totals.failed_count,
            next_billing_date: None,
            plan_name: None,
            plan_price_cents: None,
            plan_interval: None,
        };

        if let Some(subscription) = current {
            if subscription.status.grants_access() && !subscription.cancel_at_period_end {
                stats.next_billing_date = subscription.current_period_end;
            }
            if let Some(plan) = self.store.find_plan(subscription.plan_id).await? {
                stats.plan_name = Some(plan.display_name);
                stats.plan_price_cents = Some(plan.price_cents);
                stats.plan_interval = Some(plan.interval);
            }
        }

        Ok(stats)
    }
}
