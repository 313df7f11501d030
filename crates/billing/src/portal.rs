//! Billing portal sessions
//!
//! Self-serve payment method and invoice management happens in the
//! provider's hosted portal. We only mint the session URL; the portal
//! itself writes nothing locally, reconciliation picks up any changes.

use std::sync::Arc;

use inkline_shared::UserId;

use crate::customer::CustomerIdentityResolver;
use crate::error::BillingResult;
use crate::provider::ProviderClient;

pub struct BillingPortalIssuer {
    provider: Arc<dyn ProviderClient>,
    resolver: Arc<CustomerIdentityResolver>,
    /// Where the portal sends the user back, e.g. `https://app.example.com`
    app_base_url: String,
}

impl BillingPortalIssuer {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        resolver: Arc<CustomerIdentityResolver>,
        app_base_url: String,
    ) -> Self {
        Self {
            provider,
            resolver,
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn create_portal_url(&self, user_id: UserId) -> BillingResult<String> {
        let customer_id = self.resolver.resolve(user_id).await?;
        let return_url = format!("{}/billing", self.app_base_url);
        let session = self
            .provider
            .create_portal_session(&customer_id, &return_url)
            .await?;
        tracing::info!(user_id = %user_id, "billing portal session created");
        Ok(session.url)
    }
}
