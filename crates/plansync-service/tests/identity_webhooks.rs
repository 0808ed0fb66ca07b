//! Identity-provider webhook integration tests.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::{checkout_completed, TestHarness};
use serde_json::{json, Value};

use plansync_core::{Plan, SubscriptionStatus};
use plansync_store::StoreOp;

fn user_event(event_type: &str, id: &str, email: Option<&str>) -> Value {
    let addresses = email
        .map(|e| json!([{"id": "idn_1", "email_address": e}]))
        .unwrap_or_else(|| json!([]));

    json!({
        "type": event_type,
        "data": {
            "id": id,
            "email_addresses": addresses,
            "primary_email_address_id": "idn_1",
            "first_name": "Ada",
            "last_name": "Lovelace"
        }
    })
}

fn deleted_event(id: &str) -> Value {
    json!({"type": "user.deleted", "data": {"id": id, "deleted": true}})
}

#[tokio::test]
async fn created_user_gets_free_subscription() {
    let harness = TestHarness::new();

    let response = harness
        .post_identity(&user_event("user.created", "user_1", Some("ada@example.com")))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "user created");

    let users = harness.store.all_users().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].email, "ada@example.com");
    assert_eq!(users[0].first_name.as_deref(), Some("Ada"));

    let records = harness.subscriptions();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].plan, Plan::Free);
    assert_eq!(records[0].status, SubscriptionStatus::Active);
    assert!(records[0].processor_subscription_id.is_none());
}

#[tokio::test]
async fn created_after_checkout_keeps_paid_plan() {
    let harness = TestHarness::new();
    harness
        .post_processor(&checkout_completed("user_1", "ultimate", "cus_1", "sub_1"))
        .await
        .assert_status_ok();

    harness
        .post_identity(&user_event("user.created", "user_1", Some("ada@example.com")))
        .await
        .assert_status_ok();

    let records = harness.subscriptions();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].plan, Plan::Ultimate);
}

#[tokio::test]
async fn repeated_create_is_a_no_op() {
    let harness = TestHarness::new();
    let event = user_event("user.created", "user_1", Some("ada@example.com"));

    harness.post_identity(&event).await.assert_status_ok();
    let response = harness.post_identity(&event).await;

    response.assert_status_ok();
    assert_eq!(response.text(), "user already exists");
    assert_eq!(harness.store.all_users().unwrap().len(), 1);
    assert_eq!(harness.subscriptions().len(), 1);
}

#[tokio::test]
async fn redelivered_create_restores_missing_subscription() {
    let harness = TestHarness::new();
    harness.seed_user("user_1", "ada@example.com");

    let response = harness
        .post_identity(&user_event("user.created", "user_1", Some("ada@example.com")))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "user already exists");
    let records = harness.subscriptions();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].plan, Plan::Free);
}

#[tokio::test]
async fn created_without_email_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .post_identity(&user_event("user.created", "user_1", None))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(harness.store.all_users().unwrap().is_empty());
    assert!(harness.subscriptions().is_empty());
}

#[tokio::test]
async fn missing_signature_headers_are_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/api/webhooks/identity")
        .json(&user_event("user.created", "user_1", Some("ada@example.com")))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(harness.store.all_users().unwrap().is_empty());
}

#[tokio::test]
async fn updated_mirrors_profile() {
    let harness = TestHarness::new();
    harness.seed_user("user_1", "old@example.com");

    let response = harness
        .post_identity(&user_event("user.updated", "user_1", Some("new@example.com")))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "user updated");
    let users = harness.store.all_users().unwrap();
    assert_eq!(users[0].email, "new@example.com");
    assert_eq!(users[0].last_name.as_deref(), Some("Lovelace"));
}

#[tokio::test]
async fn updated_for_unknown_user_is_acknowledged() {
    let harness = TestHarness::new();

    let response = harness
        .post_identity(&user_event("user.updated", "user_ghost", Some("x@example.com")))
        .await;

    response.assert_status_ok();
    assert!(harness.store.all_users().unwrap().is_empty());
}

#[tokio::test]
async fn delete_cascades_subscriptions_before_user() {
    let harness = TestHarness::new();
    let user = harness.seed_user("user_1", "ada@example.com");
    harness.seed_subscription(
        "user_1",
        Plan::Premium,
        SubscriptionStatus::Active,
        Some("cus_1"),
        Some("sub_1"),
        Utc::now(),
    );
    harness.seed_subscription(
        "user_1",
        Plan::Free,
        SubscriptionStatus::Active,
        None,
        None,
        Utc::now() - chrono::Duration::hours(1),
    );

    let response = harness.post_identity(&deleted_event("user_1")).await;

    response.assert_status_ok();
    assert_eq!(response.text(), "user deleted (2 subscription records)");
    assert!(harness.subscriptions().is_empty());
    assert!(harness.store.all_users().unwrap().is_empty());

    let writes = harness.store.writes().unwrap();
    let cascade = writes
        .iter()
        .position(|op| matches!(op, StoreOp::DeleteSubscriptionsForUser(_)))
        .unwrap();
    let removal = writes
        .iter()
        .position(|op| op == &StoreOp::DeleteUser(user.id))
        .unwrap();
    assert!(cascade < removal);

    // Redelivery finds nothing left to delete.
    let response = harness.post_identity(&deleted_event("user_1")).await;
    response.assert_status_ok();
    assert_eq!(harness.store.writes().unwrap().len(), writes.len());
}

#[tokio::test]
async fn unknown_identity_event_is_acknowledged() {
    let harness = TestHarness::new();

    let response = harness
        .post_identity(&json!({"type": "session.created", "data": {"id": "sess_1"}}))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "unhandled event type session.created");
    assert!(harness.store.writes().unwrap().is_empty());
}
