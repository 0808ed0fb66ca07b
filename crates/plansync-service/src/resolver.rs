//! Processor customer to application user resolution.
//!
//! Strategies are tried in order and the first hit wins:
//!
//! 1. `userId` in the event's own metadata
//! 2. an existing subscription row carrying the customer reference
//! 3. `userId`/`user_id` in the processor's customer metadata (live lookup)
//!
//! The live lookup is opt-in per event type. A miss on every strategy is
//! `Ok(None)`; the caller decides whether that is an error.

use std::fmt;

use plansync_core::UserId;
use plansync_store::Store;

use crate::error::WebhookError;
use crate::stripe::StripeClient;

/// Which strategy resolved the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    /// Event metadata.
    Metadata,
    /// Existing subscription row.
    ExistingRecord,
    /// Processor customer metadata.
    ProcessorCustomer,
}

impl fmt::Display for ResolvedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Metadata => "metadata",
            Self::ExistingRecord => "existing_record",
            Self::ProcessorCustomer => "processor_customer",
        })
    }
}

/// A resolved user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    /// Application user id.
    pub user_id: UserId,
    /// How it was found.
    pub via: ResolvedVia,
}

/// What an event offers for resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lookup<'a> {
    /// `userId` from the event metadata.
    pub metadata_user_id: Option<&'a str>,
    /// Processor customer reference.
    pub customer_id: Option<&'a str>,
    /// Whether the processor may be asked about the customer.
    pub processor_lookup: bool,
}

/// Resolves processor references to application users.
pub struct UserResolver<'a> {
    store: &'a dyn Store,
    stripe: Option<&'a StripeClient>,
}

impl<'a> UserResolver<'a> {
    /// Create a resolver. `stripe` is only needed for the live lookup.
    #[must_use]
    pub fn new(store: &'a dyn Store, stripe: Option<&'a StripeClient>) -> Self {
        Self { store, stripe }
    }

    /// Run the fallback chain.
    ///
    /// # Errors
    ///
    /// Store and processor failures, and `Configuration` when the live lookup
    /// is needed but no Stripe API key is configured.
    pub async fn resolve(&self, lookup: &Lookup<'_>) -> Result<Option<ResolvedUser>, WebhookError> {
        if let Some(user_id) = lookup.metadata_user_id.and_then(|id| UserId::new(id).ok()) {
            return Ok(Some(ResolvedUser {
                user_id,
                via: ResolvedVia::Metadata,
            }));
        }

        let Some(customer_id) = lookup.customer_id else {
            return Ok(None);
        };

        let existing = self.store.subscriptions_for_customer(customer_id).await?;
        if let Some(record) = existing.into_iter().next() {
            return Ok(Some(ResolvedUser {
                user_id: record.user_id,
                via: ResolvedVia::ExistingRecord,
            }));
        }

        if !lookup.processor_lookup {
            return Ok(None);
        }

        let stripe = self.stripe.ok_or_else(|| {
            WebhookError::Configuration("STRIPE_API_KEY is required for customer lookup".into())
        })?;

        tracing::debug!(customer_id = %customer_id, "Looking up customer in Stripe");

        let user_id = stripe
            .get_customer(customer_id)
            .await?
            .as_ref()
            .and_then(|customer| customer.user_id())
            .and_then(|id| UserId::new(id).ok());

        Ok(user_id.map(|user_id| ResolvedUser {
            user_id,
            via: ResolvedVia::ProcessorCustomer,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use plansync_core::{Plan, SubscriptionId, SubscriptionRecord, SubscriptionStatus};
    use plansync_store::MemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seed(store: &MemoryStore, user: &str, customer: &str) {
        store
            .seed_subscription(SubscriptionRecord {
                id: SubscriptionId::generate(),
                user_id: UserId::new(user).unwrap(),
                plan: Plan::Premium,
                status: SubscriptionStatus::Active,
                processor_customer_id: Some(customer.into()),
                processor_subscription_id: Some("sub_1".into()),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();
    }

    async fn stripe_with_customer(body: serde_json::Value) -> (MockServer, StripeClient) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customers/cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn metadata_wins_over_existing_record() {
        let store = MemoryStore::new();
        seed(&store, "user_old", "cus_1");

        let resolved = UserResolver::new(&store, None)
            .resolve(&Lookup {
                metadata_user_id: Some("user_meta"),
                customer_id: Some("cus_1"),
                processor_lookup: true,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.user_id.as_str(), "user_meta");
        assert_eq!(resolved.via, ResolvedVia::Metadata);
    }

    #[tokio::test]
    async fn blank_metadata_falls_through_to_record() {
        let store = MemoryStore::new();
        seed(&store, "user_old", "cus_1");

        let resolved = UserResolver::new(&store, None)
            .resolve(&Lookup {
                metadata_user_id: Some("   "),
                customer_id: Some("cus_1"),
                processor_lookup: false,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.user_id.as_str(), "user_old");
        assert_eq!(resolved.via, ResolvedVia::ExistingRecord);
    }

    #[tokio::test]
    async fn lookup_disabled_returns_none() {
        let store = MemoryStore::new();
        let resolved = UserResolver::new(&store, None)
            .resolve(&Lookup {
                metadata_user_id: None,
                customer_id: Some("cus_1"),
                processor_lookup: false,
            })
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn lookup_without_api_key_is_configuration_error() {
        let store = MemoryStore::new();
        let err = UserResolver::new(&store, None)
            .resolve(&Lookup {
                metadata_user_id: None,
                customer_id: Some("cus_1"),
                processor_lookup: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Configuration(_)));
    }

    #[tokio::test]
    async fn processor_customer_metadata_resolves() {
        let store = MemoryStore::new();
        let (_server, stripe) = stripe_with_customer(serde_json::json!({
            "id": "cus_1",
            "metadata": {"user_id": "user_live"}
        }))
        .await;

        let resolved = UserResolver::new(&store, Some(&stripe))
            .resolve(&Lookup {
                metadata_user_id: None,
                customer_id: Some("cus_1"),
                processor_lookup: true,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.user_id.as_str(), "user_live");
        assert_eq!(resolved.via, ResolvedVia::ProcessorCustomer);
    }

    #[tokio::test]
    async fn deleted_customer_is_not_found() {
        let store = MemoryStore::new();
        let (_server, stripe) =
            stripe_with_customer(serde_json::json!({"id": "cus_1", "deleted": true})).await;

        let resolved = UserResolver::new(&store, Some(&stripe))
            .resolve(&Lookup {
                metadata_user_id: None,
                customer_id: Some("cus_1"),
                processor_lookup: true,
            })
            .await
            .unwrap();

        assert!(resolved.is_none());
    }
}
