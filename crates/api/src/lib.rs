//! Inkline billing API
//!
//! HTTP surface over the reconciliation engines in `inkline-billing`.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
