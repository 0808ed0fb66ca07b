//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Configured integrations.
#[derive(Debug, Serialize)]
pub struct Integrations {
    /// Stripe API key present.
    pub stripe_api: bool,
    /// Stripe webhook secret present.
    pub stripe_webhooks: bool,
    /// Identity webhook secret present.
    pub identity_webhooks: bool,
    /// Telegram notifications configured.
    pub notifications: bool,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Configured integrations.
    pub integrations: Integrations,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "plansync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        integrations: Integrations {
            stripe_api: state.has_stripe(),
            stripe_webhooks: state.config.stripe_webhook_secret.is_some(),
            identity_webhooks: state.config.identity_webhook_secret.is_some(),
            notifications: state.notifier.is_configured(),
        },
    })
}
