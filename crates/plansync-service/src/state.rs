//! Application state.

use std::sync::Arc;

use tokio::sync::RwLock;

use plansync_store::Store;

use crate::auth::JwksCache;
use crate::config::ServiceConfig;
use crate::notify::Notifier;
use crate::stripe::StripeClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client for customer lookup and cancellation (optional).
    pub stripe: Option<Arc<StripeClient>>,

    /// Subscription notifier.
    pub notifier: Arc<Notifier>,

    /// Identity-provider signing keys.
    pub jwks: Arc<RwLock<JwksCache>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        // Create Stripe client if configured
        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, config.stripe_api_base.clone()) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - customer lookup and cancellation unavailable");
        }

        let notifier = Arc::new(Notifier::new(&config));
        if !notifier.is_configured() {
            tracing::warn!("Telegram not configured - subscription notifications will be dropped");
        }

        Self {
            store,
            config,
            stripe,
            notifier,
            jwks: Arc::new(RwLock::new(JwksCache::new())),
        }
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }
}
