//! Plan catalog with localized pricing
//!
//! Plans live in the database in a base currency. When a caller asks for
//! plans in a country whose currency differs, each plan's price is
//! overlaid with the provider's localized price for the same product.
//! Products without a localized price fall back to converting the base
//! price by a ratio observed from the plans that did resolve. Results
//! are cached per country for an hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use inkline_shared::{Plan, PlanId};

use crate::currency::{conversion_ratio, convert_cents};
use crate::error::BillingResult;
use crate::provider::ProviderClient;
use crate::store::BillingStore;

const CACHE_TTL: Duration = Duration::from_secs(3600);

/// ISO country code → ISO currency code for the markets we price in.
/// Anything else sells in the base currency.
pub fn currency_for_country(country: &str) -> &'static str {
    match country.to_ascii_uppercase().as_str() {
        "GB" => "gbp",
        "CA" => "cad",
        "AU" => "aud",
        "JP" => "jpy",
        "IN" => "inr",
        "BR" => "brl",
        "AT" | "BE" | "DE" | "ES" | "FI" | "FR" | "IE" | "IT" | "NL" | "PT" => "eur",
        _ => "usd",
    }
}

struct CacheEntry {
    plans: Vec<Plan>,
    fetched_at: Instant,
}

pub struct PlanCatalog {
    provider: Arc<dyn ProviderClient>,
    store: Arc<dyn BillingStore>,
    /// Keyed by currency, not country, so GB and a hypothetical second
    /// GBP market share one entry.
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl PlanCatalog {
    pub fn new(provider: Arc<dyn ProviderClient>, store: Arc<dyn BillingStore>) -> Self {
        Self {
            provider,
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Active plans priced for a country. Cached for [`CACHE_TTL`]; a miss
    /// resolves every plan fresh rather than serving a partial overlay.
    pub async fn list_plans(&self, country: &str) -> BillingResult<Vec<Plan>> {
        let currency = currency_for_country(country);

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(currency) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(entry.plans.clone());
                }
            }
        }

        let plans = self.resolve_plans(currency).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            currency.to_string(),
            CacheEntry {
                plans: plans.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(plans)
    }

    async fn resolve_plans(&self, currency: &str) -> BillingResult<Vec<Plan>> {
        let base_plans = self.store.list_active_plans().await?;

        // Base currency needs no overlay
        if base_plans.iter().all(|p| p.currency == currency) {
            return Ok(base_plans);
        }

        let mut localized = Vec::with_capacity(base_plans.len());
        let mut missing: Vec<usize> = Vec::new();
        let mut ratio: Option<f64> = None;

        for plan in base_plans {
            match self
                .provider
                .find_price(&plan.provider_product_id, currency)
                .await?
            {
                Some(price) => {
                    // First resolved plan anchors the conversion ratio for
                    // any products the provider has no localized price for
                    if ratio.is_none() && plan.price_cents > 0 {
                        ratio = Some(conversion_ratio(plan.price_cents, price.unit_amount_cents));
                    }
                    let mut plan = plan;
                    plan.price_cents = price.unit_amount_cents;
                    plan.currency = currency.to_string();
                    plan.provider_price_id = price.id;
                    localized.push(plan);
                }
                None => {
                    missing.push(localized.len());
                    localized.push(plan);
                }
            }
        }

        let ratio = ratio.unwrap_or(1.0);
        for idx in missing {
            let plan = &mut localized[idx];
            tracing::debug!(
                plan = %plan.name,
                currency = %currency,
                ratio,
                "no localized price, converting base price"
            );
            plan.price_cents = convert_cents(plan.price_cents, ratio);
            plan.currency = currency.to_string();
        }

        Ok(localized)
    }

    /// Resolve the local plan for a provider price id. Deliberately does
    /// not filter by `is_active`: a subscription may still reference a
    /// plan that was since retired from sale.
    pub async fn plan_for_price_id(&self, price_id: &str) -> BillingResult<Option<Plan>> {
        self.store.find_plan_by_price_id(price_id).await
    }

    pub async fn plan(&self, plan_id: PlanId) -> BillingResult<Option<Plan>> {
        self.store.find_plan(plan_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_markets_map_to_their_currency() {
        assert_eq!(currency_for_country("US"), "usd");
        assert_eq!(currency_for_country("gb"), "gbp");
        assert_eq!(currency_for_country("DE"), "eur");
        assert_eq!(currency_for_country("JP"), "jpy");
    }

    #[test]
    fn unknown_country_defaults_to_usd() {
        assert_eq!(currency_for_country("ZZ"), "usd");
        assert_eq!(currency_for_country(""), "usd");
    }
}
