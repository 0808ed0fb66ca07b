//! Plansync Service - billing webhook reconciliation
//!
//! This is the main entry point for the plansync service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plansync_service::{create_router, AppState, ServiceConfig};
use plansync_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,plansync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Plansync Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        stripe_configured = %config.stripe_api_key.is_some(),
        stripe_webhooks_configured = %config.stripe_webhook_secret.is_some(),
        identity_webhooks_configured = %config.identity_webhook_secret.is_some(),
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let store = PgStore::connect(url, config.database_max_connections).await?;
        store.migrate().await?;
        Arc::new(store)
    } else {
        tracing::warn!("DATABASE_URL not set - using in-memory store, data will not persist");
        Arc::new(MemoryStore::new())
    };

    // Build app state
    let state = AppState::new(store, config.clone());

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
