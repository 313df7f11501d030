//! Customer identity resolution
//!
//! Every billing operation starts from a provider customer id. This module
//! owns the mapping between local users and provider customers: it verifies
//! stored ids against the provider, heals ids that point at deleted
//! customers, and creates a customer when none exists yet. Concurrent
//! resolutions for the same user are serialized so at most one provider
//! customer is ever persisted per user.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use inkline_shared::{User, UserId};

use crate::error::BillingResult;
use crate::provider::{ProviderClient, ProviderCustomer};
use crate::store::BillingStore;

/// What we know about a user's provider customer after checking the stored
/// id against the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerRef {
    /// Stored id exists at the provider
    Found(String),
    /// Stored id no longer resolves at the provider (deleted there)
    Stale(String),
    /// No id stored locally
    Absent,
}

/// Classify a stored customer id against the provider's answer.
///
/// `provider_customer` is the result of looking up `stored` at the
/// provider; it is ignored when nothing is stored.
pub fn classify_customer_ref(
    stored: Option<&str>,
    provider_customer: Option<&ProviderCustomer>,
) -> CustomerRef {
    match stored {
        None => CustomerRef::Absent,
        Some(id) => match provider_customer {
            Some(_) => CustomerRef::Found(id.to_string()),
            None => CustomerRef::Stale(id.to_string()),
        },
    }
}

pub struct CustomerIdentityResolver {
    provider: Arc<dyn ProviderClient>,
    store: Arc<dyn BillingStore>,
    /// Per-user resolution locks. Entries are evicted once the last
    /// resolution for that user finishes, so the map tracks in-flight
    /// work rather than every user ever seen.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CustomerIdentityResolver {
    pub fn new(provider: Arc<dyn ProviderClient>, store: Arc<dyn BillingStore>) -> Self {
        Self {
            provider,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.0)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_user_lock(&self, user_id: UserId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // Map entry plus our clone: nobody else is waiting on this user
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&user_id.0);
        }
    }

    /// Number of users with a resolution currently in flight
    pub async fn in_flight_resolutions(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Resolve the provider customer id for a user, creating the customer
    /// at the provider if necessary. Holds the per-user lock across the
    /// whole check-then-create sequence.
    pub async fn resolve(&self, user_id: UserId) -> BillingResult<String> {
        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.resolve_serialized(user_id).await
        };
        self.release_user_lock(user_id, lock).await;
        result
    }

    async fn resolve_serialized(&self, user_id: UserId) -> BillingResult<String> {
        let user = self.store.get_user(user_id).await?;

        let verified = match user.provider_customer_id.as_deref() {
            Some(stored) => self.provider.retrieve_customer(stored).await?,
            None => None,
        };

        match classify_customer_ref(user.provider_customer_id.as_deref(), verified.as_ref()) {
            CustomerRef::Found(id) => Ok(id),
            CustomerRef::Stale(id) => {
                tracing::warn!(
                    user_id = %user_id,
                    customer_id = %id,
                    "stored provider customer no longer exists, recreating"
                );
                self.store.clear_customer_id(user_id).await?;
                self.create_and_persist(&user).await
            }
            CustomerRef::Absent => self.create_and_persist(&user).await,
        }
    }

    async fn create_and_persist(&self, user: &User) -> BillingResult<String> {
        let created = self
            .provider
            .create_customer(&user.email, &user.display_name, &user.id.to_string())
            .await?;

        // The DB write is conditional on no id being present, so even if
        // two processes raced past the in-process lock only one id wins.
        let winner = self
            .store
            .set_customer_id_if_absent(user.id, &created.id)
            .await?;

        if winner != created.id {
            tracing::warn!(
                user_id = %user.id,
                created = %created.id,
                winner = %winner,
                "lost customer creation race, using stored id"
            );
        } else {
            tracing::info!(user_id = %user.id, customer_id = %winner, "provider customer created");
        }
        Ok(winner)
    }
}
