//! Subscription types for plansync.
//!
//! This module defines the subscription record, the partial state applied to
//! it during reconciliation, and the fixed mapping from processor status
//! strings to the five canonical statuses.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{SubscriptionId, UserId};

/// Available plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// No paid entitlement.
    Free,

    /// Paid tier. The legacy identifier `pro` maps here.
    #[serde(alias = "pro")]
    Premium,

    /// Top paid tier.
    Ultimate,
}

impl Plan {
    /// Stored and wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Ultimate => "ultimate",
        }
    }

    /// Human-readable plan name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Premium => "Premium",
            Self::Ultimate => "Ultimate",
        }
    }

    /// Whether the plan is a paid one.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl FromStr for Plan {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" | "pro" => Ok(Self::Premium),
            "ultimate" => Ok(Self::Ultimate),
            _ => Err(CoreError::UnknownPlan(s.to_string())),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid up (or free and enabled).
    Active,

    /// Latest invoice failed; the processor is retrying.
    PastDue,

    /// The processor gave up retrying the invoice.
    Unpaid,

    /// Subscription ended.
    Canceled,

    /// Any processor state we do not model explicitly.
    Inactive,
}

impl SubscriptionStatus {
    /// Map a processor-native status string onto a canonical status.
    ///
    /// `active`, `canceled`, `past_due` and `unpaid` map to themselves; every
    /// other value (`trialing`, `incomplete`, `paused`, ...) is `Inactive`.
    #[must_use]
    pub fn from_processor(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "canceled" => Self::Canceled,
            "past_due" => Self::PastDue,
            "unpaid" => Self::Unpaid,
            _ => Self::Inactive,
        }
    }

    /// Stored and wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = CoreError;

    /// Strict parse of a stored value. Use [`SubscriptionStatus::from_processor`]
    /// for processor input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "canceled" => Ok(Self::Canceled),
            "inactive" => Ok(Self::Inactive),
            _ => Err(CoreError::UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Store-generated identifier.
    pub id: SubscriptionId,

    /// Identity-provider subject that owns the subscription.
    pub user_id: UserId,

    /// Current plan.
    pub plan: Plan,

    /// Current canonical status.
    pub status: SubscriptionStatus,

    /// Processor customer reference, once a paid checkout completed.
    pub processor_customer_id: Option<String>,

    /// Processor subscription reference, once a paid checkout completed.
    pub processor_subscription_id: Option<String>,

    /// When the record was inserted.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Whether this record currently grants a paid entitlement.
    #[must_use]
    pub fn grants_paid_access(&self) -> bool {
        self.status == SubscriptionStatus::Active && self.plan.is_paid()
    }

    /// A paid, active record must reference a processor subscription.
    #[must_use]
    pub fn entitlement_is_backed(&self) -> bool {
        !self.grants_paid_access() || self.processor_subscription_id.is_some()
    }
}

/// Values for a record about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    /// Owner.
    pub user_id: UserId,
    /// Initial plan.
    pub plan: Plan,
    /// Initial status.
    pub status: SubscriptionStatus,
    /// Processor customer reference.
    pub processor_customer_id: Option<String>,
    /// Processor subscription reference.
    pub processor_subscription_id: Option<String>,
}

impl NewSubscription {
    /// Build an insert from a partial state, defaulting the plan to
    /// `default_plan` and the status to `Active`.
    #[must_use]
    pub fn from_patch(user_id: UserId, patch: &SubscriptionPatch, default_plan: Plan) -> Self {
        Self {
            user_id,
            plan: patch.plan.unwrap_or(default_plan),
            status: patch.status.unwrap_or(SubscriptionStatus::Active),
            processor_customer_id: patch.processor_customer_id.clone(),
            processor_subscription_id: patch.processor_subscription_id.clone(),
        }
    }
}

/// Desired partial state for a subscription record.
///
/// Present fields overwrite, absent fields are preserved. A patch never
/// clears a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    /// New plan, if the event carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,

    /// New canonical status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,

    /// Processor customer reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_customer_id: Option<String>,

    /// Processor subscription reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_subscription_id: Option<String>,
}

impl SubscriptionPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the plan.
    #[must_use]
    pub fn plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Set the plan when one is known.
    #[must_use]
    pub fn maybe_plan(mut self, plan: Option<Plan>) -> Self {
        if plan.is_some() {
            self.plan = plan;
        }
        self
    }

    /// Set the status.
    #[must_use]
    pub fn status(mut self, status: SubscriptionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the processor customer reference.
    #[must_use]
    pub fn customer(mut self, customer_id: impl Into<String>) -> Self {
        self.processor_customer_id = Some(customer_id.into());
        self
    }

    /// Set the processor subscription reference.
    #[must_use]
    pub fn subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.processor_subscription_id = Some(subscription_id.into());
        self
    }

    /// Whether the patch carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.status.is_none()
            && self.processor_customer_id.is_none()
            && self.processor_subscription_id.is_none()
    }

    /// Whether applying the patch would change `record`.
    #[must_use]
    pub fn changes(&self, record: &SubscriptionRecord) -> bool {
        self.plan.is_some_and(|p| p != record.plan)
            || self.status.is_some_and(|s| s != record.status)
            || self
                .processor_customer_id
                .as_ref()
                .is_some_and(|c| record.processor_customer_id.as_ref() != Some(c))
            || self
                .processor_subscription_id
                .as_ref()
                .is_some_and(|s| record.processor_subscription_id.as_ref() != Some(s))
    }

    /// Merge the patch onto `record`, stamping `updated_at` when anything changed.
    ///
    /// Returns whether the record changed.
    pub fn apply(&self, record: &mut SubscriptionRecord, now: DateTime<Utc>) -> bool {
        if !self.changes(record) {
            return false;
        }
        if let Some(plan) = self.plan {
            record.plan = plan;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(customer) = &self.processor_customer_id {
            record.processor_customer_id = Some(customer.clone());
        }
        if let Some(subscription) = &self.processor_subscription_id {
            record.processor_subscription_id = Some(subscription.clone());
        }
        record.updated_at = now;
        true
    }
}
