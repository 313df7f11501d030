//! Billing error types

use thiserror::Error;

/// Billing-specific errors
///
/// A stale stored customer id is deliberately not a variant: the identity
/// resolver recovers it in place and callers never see it.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Provider API failure (network, 5xx). Retryable; no local state was
    /// mutated when this is returned.
    #[error("Provider API error: {0}")]
    Provider(String),

    /// The provider subscription references a price with no matching local
    /// plan (deprecated catalog entry). The sync itself succeeded.
    #[error("No local plan matches provider price: {price_id}")]
    PlanUnavailable { price_id: String },

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Provider(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
