//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use inkline_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found")]
    NotFound,

    /// The payment provider could not be reached or answered with a server
    /// error. No local state changed; the client may retry.
    #[error("Billing provider unavailable")]
    ProviderUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),

            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            ApiError::ProviderUnavailable(detail) => {
                tracing::error!(detail = %detail, "billing provider unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_UNAVAILABLE",
                    self.to_string(),
                )
            }

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let retryable = matches!(self, ApiError::ProviderUnavailable(_));
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": retryable,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Provider(detail) => ApiError::ProviderUnavailable(detail),
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::CustomerNotFound(_)
            | BillingError::SubscriptionNotFound(_)
            | BillingError::UserNotFound(_) => ApiError::NotFound,
            // PlanUnavailable is informational and handled per-route; a
            // route that lets it reach here treats it as internal
            BillingError::PlanUnavailable { price_id } => {
                tracing::error!(price_id = %price_id, "unhandled plan-unavailable outcome");
                ApiError::Internal
            }
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Config(msg) => {
                tracing::error!(detail = %msg, "billing misconfiguration");
                ApiError::Internal
            }
            BillingError::Internal(msg) => {
                tracing::error!(detail = %msg, "billing internal error");
                ApiError::Internal
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
