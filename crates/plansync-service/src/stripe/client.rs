//! Stripe API client implementation.

use reqwest::Client;
use std::time::Duration;

use super::types::{Customer, StripeErrorResponse, Subscription};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `base_url` - API base, normally `https://api.stripe.com/v1`
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Http` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get a customer by ID.
    ///
    /// Returns `None` when Stripe answers 404. Deleted customers are returned
    /// with `deleted = true`.
    pub async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>, StripeError> {
        let response = self
            .client
            .get(format!("{}/customers/{}", self.base_url, customer_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }

    /// Schedule a subscription to cancel at the end of its current period.
    ///
    /// Access is unaffected until Stripe sends `customer.subscription.deleted`.
    pub async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<Subscription, StripeError> {
        tracing::debug!(subscription_id = %subscription_id, "Scheduling Stripe cancellation");

        let response = self
            .client
            .post(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&[("cancel_at_period_end", "true")])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn client_creation_trims_base_url() {
        let client = StripeClient::new("sk_test_xxx", "http://localhost/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost/v1");
    }

    #[tokio::test]
    async fn get_customer_returns_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customers/cus_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"type": "invalid_request_error", "message": "No such customer"}
            })))
            .mount(&server)
            .await;

        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        assert!(client.get_customer("cus_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_customer_authenticates_and_parses_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customers/cus_1"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cus_1",
                "email": "a@example.com",
                "metadata": {"userId": "user_1"}
            })))
            .mount(&server)
            .await;

        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        let customer = client.get_customer("cus_1").await.unwrap().unwrap();
        assert_eq!(customer.user_id(), Some("user_1"));
    }

    #[tokio::test]
    async fn api_errors_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscriptions/sub_1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"type": "invalid_request_error", "message": "bad", "code": "resource_missing"}
            })))
            .mount(&server)
            .await;

        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        let err = client.cancel_at_period_end("sub_1").await.unwrap_err();
        match err {
            StripeError::Api { error_type, code, .. } => {
                assert_eq!(error_type, "invalid_request_error");
                assert_eq!(code.as_deref(), Some("resource_missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancel_at_period_end_sends_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscriptions/sub_1"))
            .and(body_string_contains("cancel_at_period_end=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sub_1",
                "status": "active",
                "cancel_at_period_end": true,
                "current_period_end": 1_700_000_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        let sub = client.cancel_at_period_end("sub_1").await.unwrap();
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.status, "active");
    }
}
