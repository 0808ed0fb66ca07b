//! Stripe API types.

use std::collections::HashMap;

use serde::Deserialize;

/// Stripe customer object.
///
/// Deleted customers come back as `{"id": ..., "deleted": true}` with no
/// other fields.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Whether the customer was deleted.
    #[serde(default)]
    pub deleted: bool,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
    /// Customer name.
    #[serde(default)]
    pub name: Option<String>,
    /// Metadata attached to the customer.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Customer {
    /// Application user id stored in the customer's metadata at checkout.
    ///
    /// Checks `userId`, then `user_id`.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        if self.deleted {
            return None;
        }
        ["userId", "user_id"]
            .iter()
            .filter_map(|key| self.metadata.get(*key))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

/// Stripe subscription object, as returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription ID.
    pub id: String,
    /// Processor-native status.
    pub status: String,
    /// Whether cancellation is scheduled for the end of the period.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// End of the current period (Unix).
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_user_id_prefers_camel_case_key() {
        let customer: Customer = serde_json::from_value(serde_json::json!({
            "id": "cus_1",
            "metadata": {"userId": "user_a", "user_id": "user_b"}
        }))
        .unwrap();
        assert_eq!(customer.user_id(), Some("user_a"));
    }

    #[test]
    fn customer_user_id_falls_back_to_snake_case_key() {
        let customer: Customer = serde_json::from_value(serde_json::json!({
            "id": "cus_1",
            "metadata": {"userId": "  ", "user_id": "user_b"}
        }))
        .unwrap();
        assert_eq!(customer.user_id(), Some("user_b"));
    }

    #[test]
    fn deleted_customer_has_no_user() {
        let customer: Customer =
            serde_json::from_value(serde_json::json!({"id": "cus_1", "deleted": true})).unwrap();
        assert!(customer.deleted);
        assert_eq!(customer.user_id(), None);
    }
}
