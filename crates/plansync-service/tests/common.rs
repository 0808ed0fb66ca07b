//! Common test utilities for plansync integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestResponse, TestServer};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use plansync_core::{
    Plan, SubscriptionId, SubscriptionRecord, SubscriptionStatus, UserId, UserRecord,
    UserRecordId,
};
use plansync_service::{create_router, sign_identity, sign_processor, AppState, ServiceConfig};
use plansync_store::MemoryStore;

/// Processor webhook signing secret used by the harness.
pub const PROCESSOR_SECRET: &str = "whsec_test_processor";

/// Identity webhook signing secret used by the harness.
pub const IDENTITY_SECRET: &str = "whsec_aWRlbnRpdHktc2VjcmV0LWtleQ==";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the router, for seeding and assertions.
    pub store: Arc<MemoryStore>,
}

impl TestHarness {
    /// Harness with both webhook secrets and no external integrations.
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    /// Harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self { server, store }
    }

    /// Baseline configuration.
    pub fn config() -> ServiceConfig {
        ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            stripe_webhook_secret: Some(PROCESSOR_SECRET.into()),
            identity_webhook_secret: Some(IDENTITY_SECRET.into()),
            ..ServiceConfig::default()
        }
    }

    /// Sign and post a processor event.
    pub async fn post_processor(&self, event: &Value) -> TestResponse {
        let body = serde_json::to_vec(event).expect("serialize event");
        let signature = sign_processor(PROCESSOR_SECRET, &body, Utc::now().timestamp());
        self.post_processor_raw(body, &signature).await
    }

    /// Post a processor body with an explicit signature header.
    pub async fn post_processor_raw(&self, body: Vec<u8>, signature: &str) -> TestResponse {
        self.server
            .post("/api/webhooks/processor")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_str(signature).expect("header value"),
            )
            .bytes(body.into())
            .await
    }

    /// Sign and post an identity event.
    pub async fn post_identity(&self, event: &Value) -> TestResponse {
        let body = serde_json::to_vec(event).expect("serialize event");
        let timestamp = Utc::now().timestamp();
        let signature =
            sign_identity(IDENTITY_SECRET, "msg_test", timestamp, &body).expect("sign");

        self.server
            .post("/api/webhooks/identity")
            .add_header(
                HeaderName::from_static("svix-id"),
                HeaderValue::from_static("msg_test"),
            )
            .add_header(
                HeaderName::from_static("svix-timestamp"),
                HeaderValue::from_str(&timestamp.to_string()).expect("header value"),
            )
            .add_header(
                HeaderName::from_static("svix-signature"),
                HeaderValue::from_str(&signature).expect("header value"),
            )
            .bytes(body.into())
            .await
    }

    /// Every subscription record, newest first.
    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.store.all_subscriptions().expect("read subscriptions")
    }

    /// Seed a subscription row created at `created_at`.
    pub fn seed_subscription(
        &self,
        user_id: &str,
        plan: Plan,
        status: SubscriptionStatus,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> SubscriptionRecord {
        let record = SubscriptionRecord {
            id: SubscriptionId::generate(),
            user_id: UserId::new(user_id).expect("user id"),
            plan,
            status,
            processor_customer_id: customer_id.map(String::from),
            processor_subscription_id: subscription_id.map(String::from),
            created_at,
            updated_at: created_at,
        };
        self.store
            .seed_subscription(record.clone())
            .expect("seed subscription");
        record
    }

    /// Seed a user row.
    pub fn seed_user(&self, user_id: &str, email: &str) -> UserRecord {
        let record = UserRecord {
            id: UserRecordId::generate(),
            external_id: UserId::new(user_id).expect("user id"),
            email: email.into(),
            first_name: None,
            last_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.seed_user(record.clone()).expect("seed user");
        record
    }

    /// Authorization header for a test user.
    pub fn user_auth(user_id: &str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer test-token:{user_id}")).expect("header value"),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a processor event envelope.
pub fn processor_event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {"object": object}
    })
}

/// A paid `checkout.session.completed` event.
pub fn checkout_completed(user_id: &str, plan: &str, customer: &str, subscription: &str) -> Value {
    processor_event(
        &format!("evt_checkout_{subscription}"),
        "checkout.session.completed",
        json!({
            "id": format!("cs_{subscription}"),
            "customer": customer,
            "subscription": subscription,
            "payment_status": "paid",
            "amount_total": 4900,
            "currency": "usd",
            "customer_details": {"name": "Test User", "email": "test@example.com"},
            "metadata": {"userId": user_id, "planId": plan}
        }),
    )
}

/// A `customer.subscription.*` event.
pub fn subscription_event(
    event_type: &str,
    customer: &str,
    subscription: &str,
    status: &str,
    metadata: Value,
) -> Value {
    processor_event(
        &format!("evt_{event_type}_{subscription}"),
        event_type,
        json!({
            "id": subscription,
            "customer": customer,
            "status": status,
            "metadata": metadata
        }),
    )
}

/// An `invoice.*` event.
pub fn invoice_event(event_type: &str, customer: &str) -> Value {
    processor_event(
        &format!("evt_{event_type}_{customer}"),
        event_type,
        json!({"id": "in_1", "customer": customer}),
    )
}
