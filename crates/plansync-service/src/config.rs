//! Service configuration.

use serde::Deserialize;
use std::path::Path;

/// Default Stripe API base URL.
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Default Telegram Bot API base URL.
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Service configuration loaded from environment variables.
///
/// Built once at process start and shared by every handler through
/// [`AppState`](crate::AppState). Secrets are optional here: a missing secret
/// only fails the operation that needs it.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection URL. Without it the service runs on the in-memory store.
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    pub database_max_connections: u32,

    /// Stripe secret API key (used for customer lookup and cancellation).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret.
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL.
    pub stripe_api_base: String,

    /// Identity-provider webhook signing secret (`whsec_...`).
    pub identity_webhook_secret: Option<String>,

    /// Identity-provider issuer URL, used to fetch JWKS for request authentication.
    pub identity_issuer_url: Option<String>,

    /// Telegram bot token for subscription notifications.
    pub telegram_bot_token: Option<String>,

    /// Telegram chat that receives notifications.
    pub telegram_chat_id: Option<String>,

    /// Telegram Bot API base URL.
    pub telegram_api_base: String,

    /// Public application URL, linked from notifications.
    pub app_base_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Accepted age of a webhook signature timestamp, in seconds.
    pub webhook_tolerance_seconds: i64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();
        let defaults = Self::default();

        Self {
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: env_or("STRIPE_API_BASE", defaults.stripe_api_base),
            identity_webhook_secret: env_opt("IDENTITY_WEBHOOK_SECRET"),
            identity_issuer_url: env_opt("IDENTITY_ISSUER_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_opt("TELEGRAM_CHAT_ID"),
            telegram_api_base: env_or("TELEGRAM_API_BASE", defaults.telegram_api_base),
            app_base_url: env_or("APP_BASE_URL", defaults.app_base_url),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            webhook_tolerance_seconds: env_parse(
                "WEBHOOK_TOLERANCE_SECONDS",
                defaults.webhook_tolerance_seconds,
            ),
        }
    }
}

/// Read an environment variable, treating empty values as unset.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: String) -> String {
    env_opt(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (
                Some(secrets.api_key),
                secrets.webhook_secret.filter(|s| !s.is_empty()),
            );
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (env_opt("STRIPE_API_KEY"), env_opt("STRIPE_WEBHOOK_SECRET"))
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 5,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: DEFAULT_STRIPE_API_BASE.into(),
            identity_webhook_secret: None,
            identity_issuer_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_base: DEFAULT_TELEGRAM_API_BASE.into(),
            app_base_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            webhook_tolerance_seconds: 300,
        }
    }
}
