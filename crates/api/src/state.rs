//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use inkline_billing::BillingService;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub billing: Arc<BillingService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, billing: Arc<BillingService>, config: Config) -> Self {
        Self {
            pool,
            billing,
            config: Arc::new(config),
        }
    }
}
