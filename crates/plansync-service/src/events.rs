//! Typed webhook events.
//!
//! Envelopes are decoded first ([`RawEvent`], [`RawIdentityEvent`]); the
//! `type` string then selects a variant whose payload carries only the fields
//! that event needs. Anything the router does not handle decodes to
//! `Unhandled` without touching the payload.

use serde::Deserialize;

use plansync_core::{CoreError, Plan, UserProfile};

// ============================================================================
// Payment processor
// ============================================================================

/// Processor webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: i64,
    /// Event data.
    pub data: RawEventData,
}

/// Processor event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Application metadata attached at checkout and copied onto the
/// subscription.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    /// Application user id.
    #[serde(default, rename = "userId", alias = "user_id")]
    pub user_id: Option<String>,
    /// Purchased plan.
    #[serde(default, rename = "planId", alias = "plan_id")]
    pub plan_id: Option<String>,
}

impl EventMetadata {
    /// The user id, if present and non-blank.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// The plan, if one was given.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownPlan` for an unrecognized plan identifier.
    pub fn plan(&self) -> Result<Option<Plan>, CoreError> {
        self.plan_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<Plan>)
            .transpose()
    }
}

/// Buyer details captured by checkout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    /// Buyer email.
    #[serde(default)]
    pub email: Option<String>,
    /// Buyer name.
    #[serde(default)]
    pub name: Option<String>,
}

/// `checkout.session.completed` object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription created by the session.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Payment status ("paid", "unpaid", "no_payment_required").
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Total amount in minor units.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Currency code.
    #[serde(default)]
    pub currency: Option<String>,
    /// Buyer details.
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    /// Application metadata.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl CheckoutSession {
    /// Whether the session has been paid for.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}

/// Price attached to a subscription item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Price {
    /// Unit amount in minor units.
    #[serde(default)]
    pub unit_amount: Option<i64>,
    /// Currency code.
    #[serde(default)]
    pub currency: Option<String>,
}

/// A subscription line item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItem {
    /// Item price.
    #[serde(default)]
    pub price: Option<Price>,
}

/// Subscription item list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    /// Items.
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

/// `customer.subscription.created` / `.updated` object.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    /// Subscription ID.
    pub id: String,
    /// Customer ID.
    pub customer: String,
    /// Processor-native status.
    pub status: String,
    /// Whether cancellation is scheduled for the end of the period.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Line items.
    #[serde(default)]
    pub items: SubscriptionItems,
    /// Application metadata.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl SubscriptionObject {
    /// Price of the first line item.
    #[must_use]
    pub fn price(&self) -> Option<&Price> {
        self.items.data.first().and_then(|item| item.price.as_ref())
    }
}

/// An object that only needs its customer reference
/// (`customer.subscription.deleted`, `invoice.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerScoped {
    /// Object ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Customer ID.
    pub customer: String,
}

/// A processor event the router understands.
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    /// `checkout.session.completed`
    CheckoutCompleted(CheckoutSession),
    /// `customer.subscription.created`
    SubscriptionCreated(SubscriptionObject),
    /// `customer.subscription.updated`
    SubscriptionUpdated(SubscriptionObject),
    /// `customer.subscription.deleted`
    SubscriptionDeleted(CustomerScoped),
    /// `invoice.payment_succeeded`
    InvoicePaymentSucceeded(CustomerScoped),
    /// `invoice.payment_failed`
    InvoicePaymentFailed(CustomerScoped),
    /// Anything else.
    Unhandled,
}

impl ProcessorEvent {
    /// Decode the payload of `raw` according to its type.
    ///
    /// # Errors
    ///
    /// Returns an error when a handled event's object is missing a required
    /// field.
    pub fn decode(raw: &RawEvent) -> Result<Self, serde_json::Error> {
        let object = || raw.data.object.clone();

        Ok(match raw.event_type.as_str() {
            "checkout.session.completed" => {
                Self::CheckoutCompleted(serde_json::from_value(object())?)
            }
            "customer.subscription.created" => {
                Self::SubscriptionCreated(serde_json::from_value(object())?)
            }
            "customer.subscription.updated" => {
                Self::SubscriptionUpdated(serde_json::from_value(object())?)
            }
            "customer.subscription.deleted" => {
                Self::SubscriptionDeleted(serde_json::from_value(object())?)
            }
            "invoice.payment_succeeded" => {
                Self::InvoicePaymentSucceeded(serde_json::from_value(object())?)
            }
            "invoice.payment_failed" => {
                Self::InvoicePaymentFailed(serde_json::from_value(object())?)
            }
            _ => Self::Unhandled,
        })
    }
}

// ============================================================================
// Identity provider
// ============================================================================

/// Identity webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIdentityEvent {
    /// Event type (e.g., "user.created").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: serde_json::Value,
}

/// One email address on an identity user.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailAddress {
    /// Address ID.
    #[serde(default)]
    pub id: Option<String>,
    /// The address.
    pub email_address: String,
}

/// Identity user payload (`user.created`, `user.updated`).
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityUser {
    /// Subject.
    pub id: String,
    /// Email addresses.
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    /// Which address is primary.
    #[serde(default)]
    pub primary_email_address_id: Option<String>,
    /// Given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default)]
    pub last_name: Option<String>,
}

impl IdentityUser {
    /// The primary email, falling back to the first listed address.
    #[must_use]
    pub fn primary_email(&self) -> Option<&str> {
        let primary = self.primary_email_address_id.as_deref().and_then(|pid| {
            self.email_addresses
                .iter()
                .find(|e| e.id.as_deref() == Some(pid))
        });

        primary
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.trim())
            .filter(|e| !e.is_empty())
    }

    /// Profile fields to mirror.
    #[must_use]
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            email: self.primary_email().map(str::to_string),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// Identity user-deleted payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletedIdentityUser {
    /// Subject.
    pub id: String,
}

/// An identity event the sync understands.
#[derive(Debug, Clone)]
pub enum IdentityEvent {
    /// `user.created`
    UserCreated(IdentityUser),
    /// `user.updated`
    UserUpdated(IdentityUser),
    /// `user.deleted`
    UserDeleted(DeletedIdentityUser),
    /// Anything else.
    Unhandled(String),
}

impl IdentityEvent {
    /// Decode the payload of `raw` according to its type.
    ///
    /// # Errors
    ///
    /// Returns an error when a handled event's data is missing a required
    /// field.
    pub fn decode(raw: RawIdentityEvent) -> Result<Self, serde_json::Error> {
        Ok(match raw.event_type.as_str() {
            "user.created" => Self::UserCreated(serde_json::from_value(raw.data)?),
            "user.updated" => Self::UserUpdated(serde_json::from_value(raw.data)?),
            "user.deleted" => Self::UserDeleted(serde_json::from_value(raw.data)?),
            _ => Self::Unhandled(raw.event_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(event_type: &str, object: serde_json::Value) -> RawEvent {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1_700_000_000,
            "data": {"object": object}
        }))
        .unwrap()
    }

    #[test]
    fn decodes_checkout_with_metadata() {
        let event = ProcessorEvent::decode(&raw(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "payment_status": "paid",
                "metadata": {"userId": "user_1", "planId": "pro"}
            }),
        ))
        .unwrap();

        let ProcessorEvent::CheckoutCompleted(session) = event else {
            panic!("wrong variant");
        };
        assert!(session.is_paid());
        assert_eq!(session.metadata.user_id(), Some("user_1"));
        assert_eq!(session.metadata.plan().unwrap(), Some(Plan::Premium));
    }

    #[test]
    fn unknown_plan_is_an_error() {
        let metadata = EventMetadata {
            user_id: None,
            plan_id: Some("gold".into()),
        };
        assert!(metadata.plan().is_err());
        assert_eq!(EventMetadata::default().plan().unwrap(), None);
    }

    #[test]
    fn subscription_requires_customer() {
        let err = ProcessorEvent::decode(&raw(
            "customer.subscription.updated",
            json!({"id": "sub_1", "status": "active"}),
        ));
        assert!(err.is_err());
    }

    #[test]
    fn subscription_price_comes_from_first_item() {
        let event = ProcessorEvent::decode(&raw(
            "customer.subscription.created",
            json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "items": {"data": [{"price": {"unit_amount": 1900, "currency": "usd"}}]}
            }),
        ))
        .unwrap();

        let ProcessorEvent::SubscriptionCreated(sub) = event else {
            panic!("wrong variant");
        };
        assert_eq!(sub.price().and_then(|p| p.unit_amount), Some(1900));
        assert!(!sub.cancel_at_period_end);
    }

    #[test]
    fn unknown_types_are_not_decoded() {
        let event = ProcessorEvent::decode(&raw("charge.refunded", json!("not an object"))).unwrap();
        assert!(matches!(event, ProcessorEvent::Unhandled));
    }

    #[test]
    fn primary_email_is_selected_by_id() {
        let user: IdentityUser = serde_json::from_value(json!({
            "id": "user_1",
            "email_addresses": [
                {"id": "e1", "email_address": "old@example.com"},
                {"id": "e2", "email_address": "new@example.com"}
            ],
            "primary_email_address_id": "e2"
        }))
        .unwrap();
        assert_eq!(user.primary_email(), Some("new@example.com"));
    }

    #[test]
    fn primary_email_falls_back_to_first() {
        let user: IdentityUser = serde_json::from_value(json!({
            "id": "user_1",
            "email_addresses": [{"id": "e1", "email_address": "only@example.com"}],
            "primary_email_address_id": "missing"
        }))
        .unwrap();
        assert_eq!(user.primary_email(), Some("only@example.com"));

        let user: IdentityUser = serde_json::from_value(json!({"id": "user_2"})).unwrap();
        assert_eq!(user.primary_email(), None);
    }

    #[test]
    fn identity_event_types() {
        let event = IdentityEvent::decode(RawIdentityEvent {
            event_type: "user.deleted".into(),
            data: json!({"id": "user_1", "deleted": true}),
        })
        .unwrap();
        assert!(matches!(event, IdentityEvent::UserDeleted(ref u) if u.id == "user_1"));

        let event = IdentityEvent::decode(RawIdentityEvent {
            event_type: "session.created".into(),
            data: json!({}),
        })
        .unwrap();
        assert!(matches!(event, IdentityEvent::Unhandled(ref t) if t == "session.created"));
    }
}
