//! Postgres-backed billing store

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use inkline_shared::{
    PaymentRecord, Plan, PlanId, Subscription, SubscriptionId, User, UserId,
};

use crate::error::{BillingError, BillingResult};

use super::{
    BillingStore, HistoryFilter, PaymentTotals, PaymentUpsert, SubscriptionUpsert, UpsertOutcome,
};

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

/// Billing store over Postgres. Upserts rely on the unique constraints on
/// `provider_subscription_id` and `provider_invoice_id`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn get_user(&self, user_id: UserId) -> BillingResult<User> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        user.ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> BillingResult<Option<User>> {
        let user: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE provider_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    async fn set_customer_id_if_absent(
        &self,
        user_id: UserId,
        customer_id: &str,
    ) -> BillingResult<String> {
        // Compare-and-swap: only write into a NULL slot. If another writer
        // won the race, re-read and return theirs.
        let updated = sqlx::query(
            r#"
            UPDATE users
            SET provider_customer_id = $1, updated_at = NOW()
            WHERE id = $2 AND provider_customer_id IS NULL
            "#,
        )
        .bind(customer_id)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(customer_id.to_string());
        }

        let stored: Option<(Option<String>,)> =
            sqlx::query_as("SELECT provider_customer_id FROM users WHERE id = $1")
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            Some((Some(winner),)) => Ok(winner),
            Some((None,)) => Err(BillingError::Internal(format!(
                "customer id write for user {} raced with a concurrent clear",
                user_id
            ))),
            None => Err(BillingError::UserNotFound(user_id.to_string())),
        }
    }

    async fn clear_customer_id(&self, user_id: UserId) -> BillingResult<()> {
        sqlx::query(
            "UPDATE users SET provider_customer_id = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active_plans(&self) -> BillingResult<Vec<Plan>> {
        let plans: Vec<Plan> =
            sqlx::query_as("SELECT * FROM plans WHERE is_active = TRUE ORDER BY sort_order, name")
                .fetch_all(&self.pool)
                .await?;

        Ok(plans)
    }

    async fn find_plan_by_price_id(&self, price_id: &str) -> BillingResult<Option<Plan>> {
        let plan: Option<Plan> =
            sqlx::query_as("SELECT * FROM plans WHERE provider_price_id = $1")
                .bind(price_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(plan)
    }

    async fn find_plan(&self, plan_id: PlanId) -> BillingResult<Option<Plan>> {
        let plan: Option<Plan> = sqlx::query_as("SELECT * FROM plans WHERE id = $1")
            .bind(plan_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(plan)
    }

    async fn upsert_subscription(
        &self,
        upsert: SubscriptionUpsert,
    ) -> BillingResult<Subscription> {
        // The DO UPDATE is guarded so a no-op write leaves the row (and its
        // updated_at) untouched; RETURNING yields nothing in that case and
        // the unchanged row is read back instead.
        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_id, provider_subscription_id, provider_customer_id,
                status, current_period_start, current_period_end, cancel_at_period_end,
                canceled_at, trial_start, trial_end, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW()
            )
            ON CONFLICT (provider_subscription_id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                provider_customer_id = EXCLUDED.provider_customer_id,
                status = EXCLUDED.status,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                trial_start = EXCLUDED.trial_start,
                trial_end = EXCLUDED.trial_end,
                updated_at = NOW()
            WHERE (
                subscriptions.plan_id, subscriptions.provider_customer_id,
                subscriptions.status, subscriptions.current_period_start,
                subscriptions.current_period_end, subscriptions.cancel_at_period_end,
                subscriptions.canceled_at, subscriptions.trial_start,
                subscriptions.trial_end
            ) IS DISTINCT FROM (
                EXCLUDED.plan_id, EXCLUDED.provider_customer_id,
                EXCLUDED.status, EXCLUDED.current_period_start,
                EXCLUDED.current_period_end, EXCLUDED.cancel_at_period_end,
                EXCLUDED.canceled_at, EXCLUDED.trial_start,
                EXCLUDED.trial_end
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upsert.user_id.0)
        .bind(upsert.plan_id.0)
        .bind(&upsert.provider_subscription_id)
        .bind(&upsert.provider_customer_id)
        .bind(upsert.status.to_string())
        .bind(upsert.current_period_start)
        .bind(upsert.current_period_end)
        .bind(upsert.cancel_at_period_end)
        .bind(upsert.canceled_at)
        .bind(upsert.trial_start)
        .bind(upsert.trial_end)
        .fetch_optional(&self.pool)
        .await?;

        match subscription {
            Some(subscription) => Ok(subscription),
            None => {
                let unchanged: Subscription = sqlx::query_as(
                    "SELECT * FROM subscriptions WHERE provider_subscription_id = $1",
                )
                .bind(&upsert.provider_subscription_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(unchanged)
            }
        }
    }

    async fn current_subscription(&self, user_id: UserId) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status != 'canceled'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn find_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE id = $1")
                .bind(subscription_id.0)
                .fetch_optional(&self.pool)
                .await?;

        Ok(subscription)
    }

    async fn supersede_active_except(
        &self,
        user_id: UserId,
        keep_provider_subscription_id: Option<&str>,
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', canceled_at = COALESCE(canceled_at, NOW()), updated_at = NOW()
            WHERE user_id = $1
              AND status IN ('active', 'trialing', 'past_due', 'unpaid')
              AND ($2::TEXT IS NULL OR provider_subscription_id != $2)
            "#,
        )
        .bind(user_id.0)
        .bind(keep_provider_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_payment(&self, upsert: PaymentUpsert) -> BillingResult<UpsertOutcome> {
        // `xmax = 0` distinguishes a fresh insert from a conflict-update
        let row: (bool,) = sqlx::query_as(
            r#"
            INSERT INTO payment_records (
                id, user_id, subscription_id, provider_invoice_id, provider_payment_intent_id,
                amount_cents, currency, status, hosted_invoice_url, pdf_url,
                paid_at, failed_at, failure_reason, metadata, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW()
            )
            ON CONFLICT (provider_invoice_id) DO UPDATE SET
                subscription_id = EXCLUDED.subscription_id,
                provider_payment_intent_id = EXCLUDED.provider_payment_intent_id,
                amount_cents = EXCLUDED.amount_cents,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                hosted_invoice_url = EXCLUDED.hosted_invoice_url,
                pdf_url = EXCLUDED.pdf_url,
                paid_at = EXCLUDED.paid_at,
                failed_at = EXCLUDED.failed_at,
                failure_reason = EXCLUDED.failure_reason,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upsert.user_id.0)
        .bind(upsert.subscription_id.map(|id| id.0))
        .bind(&upsert.provider_invoice_id)
        .bind(&upsert.provider_payment_intent_id)
        .bind(upsert.amount_cents)
        .bind(&upsert.currency)
        .bind(upsert.status.to_string())
        .bind(&upsert.hosted_invoice_url)
        .bind(&upsert.pdf_url)
        .bind(upsert.paid_at)
        .bind(upsert.failed_at)
        .bind(&upsert.failure_reason)
        .bind(&upsert.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(if row.0 {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn payment_history(
        &self,
        user_id: UserId,
        filter: &HistoryFilter,
    ) -> BillingResult<Vec<PaymentRecord>> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);

        let records: Vec<PaymentRecord> = sqlx::query_as(
            r#"
            SELECT * FROM payment_records
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id.0)
        .bind(filter.status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn payment_totals(&self, user_id: UserId) -> BillingResult<PaymentTotals> {
        let (total_paid_cents, succeeded_count, failed_count): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount_cents) FILTER (WHERE status = 'succeeded'), 0)::BIGINT,
                COUNT(*) FILTER (WHERE status = 'succeeded'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM payment_records
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(PaymentTotals {
            total_paid_cents,
            succeeded_count,
            failed_count,
        })
    }
}
