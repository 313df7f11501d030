use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use inkline_api::{routes, AppState, Config};
use inkline_billing::{
    stripe::{StripeConfig, StripeProvider},
    BillingService, BillingStore, PgStore, ProviderClient,
};
use inkline_shared::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is expected in production
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let pool = db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to database")?;
    db::run_migrations(&pool).await.context("running migrations")?;

    let provider: Arc<dyn ProviderClient> = Arc::new(StripeProvider::new(StripeConfig {
        secret_key: config.stripe_secret_key.clone(),
        app_base_url: config.app_base_url.clone(),
    }));
    let store: Arc<dyn BillingStore> = Arc::new(PgStore::new(pool.clone()));
    let billing = Arc::new(BillingService::new(
        provider,
        store,
        config.app_base_url.clone(),
    ));

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, billing, config);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!(address = %bind_address, "inkline-api listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
