//! Processor event routing and handlers.
//!
//! [`dispatch`] maps a verified envelope to its handler. Each handler resolves
//! the user, runs one reconciliation pass and describes what it did in a
//! [`HandlerResult`], which is merged into the acknowledgement body.

use serde::Serialize;

use plansync_core::{Plan, SubscriptionPatch, SubscriptionRecord, SubscriptionStatus, UserId};

use crate::error::WebhookError;
use crate::events::{
    CheckoutSession, CustomerScoped, ProcessorEvent, RawEvent, SubscriptionObject,
};
use crate::notify::SubscriptionNotice;
use crate::reconcile::{reconcile, CreatePolicy, ReconcileOutcome, Reconciled};
use crate::resolver::{Lookup, UserResolver};
use crate::state::AppState;

/// What a handler did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResult {
    /// Resolved user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Users touched, when the event spans several.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<String>,
    /// Resolution strategy used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_via: Option<String>,
    /// Reconciliation outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
    /// Plan after the pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    /// Status after the pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
    /// Duplicate rows deleted.
    #[serde(skip_serializing_if = "is_zero")]
    pub collapsed: u64,
    /// Processor-side scheduled cancellation; status is left alone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_at_period_end: Option<bool>,
    /// A notification was handed to the notifier.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub notification_queued: bool,
    /// Why nothing was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl HandlerResult {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }

    fn from_reconciled(user_id: &UserId, reconciled: &Reconciled) -> Self {
        let mut result = Self {
            user_id: Some(user_id.to_string()),
            outcome: Some(reconciled.outcome),
            collapsed: reconciled.collapsed,
            ..Self::default()
        };
        if let Some(record) = &reconciled.record {
            result.plan = Some(record.plan);
            result.status = Some(record.status);
        }
        if reconciled.outcome == ReconcileOutcome::Skipped {
            result.skipped = Some("no subscription record for user".into());
        }
        result
    }
}

/// Result of routing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A handler ran.
    Handled(HandlerResult),
    /// The event type is not routed.
    Unhandled,
}

/// Route a verified processor event to its handler.
///
/// # Errors
///
/// `Payload` when a routed event's object is malformed; otherwise whatever
/// the handler returns.
pub async fn dispatch(state: &AppState, raw: &RawEvent) -> Result<Dispatched, WebhookError> {
    let result = match ProcessorEvent::decode(raw)? {
        ProcessorEvent::CheckoutCompleted(session) => {
            checkout_completed(state, raw, &session).await?
        }
        ProcessorEvent::SubscriptionCreated(sub) | ProcessorEvent::SubscriptionUpdated(sub) => {
            subscription_changed(state, raw, &sub).await?
        }
        ProcessorEvent::SubscriptionDeleted(obj) => subscription_deleted(state, &obj).await?,
        ProcessorEvent::InvoicePaymentSucceeded(invoice) => {
            invoice_paid(state, &invoice, SubscriptionStatus::Active).await?
        }
        ProcessorEvent::InvoicePaymentFailed(invoice) => {
            invoice_paid(state, &invoice, SubscriptionStatus::PastDue).await?
        }
        ProcessorEvent::Unhandled => {
            tracing::debug!(
                event_type = %raw.event_type,
                event_id = %raw.id,
                "Unhandled processor event"
            );
            return Ok(Dispatched::Unhandled);
        }
    };

    Ok(Dispatched::Handled(result))
}

fn resolver(state: &AppState) -> UserResolver<'_> {
    UserResolver::new(state.store.as_ref(), state.stripe.as_deref())
}

async fn checkout_completed(
    state: &AppState,
    raw: &RawEvent,
    session: &CheckoutSession,
) -> Result<HandlerResult, WebhookError> {
    if !session.is_paid() {
        tracing::info!(
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout session not paid yet, skipping"
        );
        return Ok(HandlerResult::skipped(format!(
            "payment_status is {}",
            session.payment_status.as_deref().unwrap_or("missing")
        )));
    }

    let (Some(customer_id), Some(subscription_id)) = (&session.customer, &session.subscription)
    else {
        tracing::info!(session_id = %session.id, "Checkout session has no subscription, skipping");
        return Ok(HandlerResult::skipped("checkout has no subscription"));
    };

    let plan = session.metadata.plan()?;

    let resolved = resolver(state)
        .resolve(&Lookup {
            metadata_user_id: session.metadata.user_id(),
            customer_id: Some(customer_id.as_str()),
            processor_lookup: false,
        })
        .await?
        .ok_or_else(|| WebhookError::UserNotFound {
            customer_id: customer_id.clone(),
        })?;

    tracing::info!(
        user_id = %resolved.user_id,
        customer_id = %customer_id,
        subscription_id = %subscription_id,
        plan = ?plan,
        "Processing checkout completion"
    );

    let patch = SubscriptionPatch::new()
        .maybe_plan(plan)
        .status(SubscriptionStatus::Active)
        .customer(customer_id.as_str())
        .subscription(subscription_id.as_str());

    let reconciled = reconcile(
        state.store.as_ref(),
        &resolved.user_id,
        &patch,
        CreatePolicy::CreateWith(Plan::Premium),
    )
    .await?;

    let mut result = HandlerResult::from_reconciled(&resolved.user_id, &reconciled);
    result.resolved_via = Some(resolved.via.to_string());

    if reconciled.starts_new_subscription() {
        let details = session.customer_details.clone().unwrap_or_default();
        result.notification_queued = notify(
            state,
            raw,
            &resolved.user_id,
            &reconciled,
            session.amount_total,
            session.currency.clone(),
            details.name,
            details.email,
        );
    }

    Ok(result)
}

async fn subscription_changed(
    state: &AppState,
    raw: &RawEvent,
    sub: &SubscriptionObject,
) -> Result<HandlerResult, WebhookError> {
    let plan = sub.metadata.plan()?;

    let resolved = resolver(state)
        .resolve(&Lookup {
            metadata_user_id: sub.metadata.user_id(),
            customer_id: Some(sub.customer.as_str()),
            processor_lookup: true,
        })
        .await?
        .ok_or_else(|| WebhookError::UserNotFound {
            customer_id: sub.customer.clone(),
        })?;

    let status = SubscriptionStatus::from_processor(&sub.status);

    tracing::info!(
        user_id = %resolved.user_id,
        customer_id = %sub.customer,
        subscription_id = %sub.id,
        processor_status = %sub.status,
        status = %status,
        cancel_at_period_end = sub.cancel_at_period_end,
        "Processing subscription change"
    );

    let patch = SubscriptionPatch::new()
        .maybe_plan(plan)
        .status(status)
        .customer(sub.customer.as_str())
        .subscription(sub.id.as_str());

    let reconciled = reconcile(
        state.store.as_ref(),
        &resolved.user_id,
        &patch,
        CreatePolicy::CreateWith(Plan::Premium),
    )
    .await?;

    let mut result = HandlerResult::from_reconciled(&resolved.user_id, &reconciled);
    result.resolved_via = Some(resolved.via.to_string());
    if sub.cancel_at_period_end {
        result.cancel_at_period_end = Some(true);
    }

    if reconciled.starts_new_subscription() {
        let price = sub.price().cloned().unwrap_or_default();
        result.notification_queued = notify(
            state,
            raw,
            &resolved.user_id,
            &reconciled,
            price.unit_amount,
            price.currency,
            None,
            None,
        );
    }

    Ok(result)
}

async fn subscription_deleted(
    state: &AppState,
    obj: &CustomerScoped,
) -> Result<HandlerResult, WebhookError> {
    let records = state.store.subscriptions_for_customer(&obj.customer).await?;

    let mut users: Vec<UserId> = Vec::new();
    for record in records {
        if !users.contains(&record.user_id) {
            users.push(record.user_id);
        }
    }

    if users.is_empty() {
        tracing::warn!(
            customer_id = %obj.customer,
            subscription_id = ?obj.id,
            "Subscription deleted for unknown customer"
        );
        return Ok(HandlerResult::skipped("no subscription record for customer"));
    }

    let cancel = SubscriptionPatch::new().status(SubscriptionStatus::Canceled);
    let mut canceled = Vec::new();
    let mut collapsed = 0;
    for user_id in &users {
        let current = state.store.subscriptions_for_user(user_id).await?;
        let targets_canonical = current.first().is_some_and(|r| deletion_targets(obj, r));

        // A newer subscription under another customer or id stays as it is.
        let patch = if targets_canonical {
            cancel.clone()
        } else {
            tracing::info!(
                user_id = %user_id,
                customer_id = %obj.customer,
                subscription_id = ?obj.id,
                "Deleted subscription is not the user's current one"
            );
            SubscriptionPatch::new()
        };

        let reconciled =
            reconcile(state.store.as_ref(), user_id, &patch, CreatePolicy::UpdateOnly).await?;
        collapsed += reconciled.collapsed;

        if targets_canonical {
            tracing::info!(
                user_id = %user_id,
                customer_id = %obj.customer,
                "Subscription canceled"
            );
            canceled.push(user_id.to_string());
        }
    }

    if canceled.is_empty() {
        return Ok(HandlerResult {
            skipped: Some("deleted subscription is not current".into()),
            collapsed,
            ..HandlerResult::default()
        });
    }

    Ok(HandlerResult {
        user_ids: canceled,
        status: Some(SubscriptionStatus::Canceled),
        collapsed,
        ..HandlerResult::default()
    })
}

/// Whether a deletion for `obj` applies to `record`.
fn deletion_targets(obj: &CustomerScoped, record: &SubscriptionRecord) -> bool {
    if record.processor_customer_id.as_deref() != Some(obj.customer.as_str()) {
        return false;
    }
    match (&obj.id, &record.processor_subscription_id) {
        (Some(deleted), Some(current)) => deleted == current,
        _ => true,
    }
}

async fn invoice_paid(
    state: &AppState,
    invoice: &CustomerScoped,
    status: SubscriptionStatus,
) -> Result<HandlerResult, WebhookError> {
    let resolved = resolver(state)
        .resolve(&Lookup {
            metadata_user_id: None,
            customer_id: Some(invoice.customer.as_str()),
            processor_lookup: false,
        })
        .await?;

    let Some(resolved) = resolved else {
        tracing::warn!(
            customer_id = %invoice.customer,
            invoice_id = ?invoice.id,
            "Invoice for unknown customer"
        );
        return Ok(HandlerResult::skipped("no subscription record for customer"));
    };

    let patch = SubscriptionPatch::new().status(status);
    let reconciled = reconcile(
        state.store.as_ref(),
        &resolved.user_id,
        &patch,
        CreatePolicy::UpdateOnly,
    )
    .await?;

    tracing::info!(
        user_id = %resolved.user_id,
        customer_id = %invoice.customer,
        status = %status,
        "Invoice status applied"
    );

    let mut result = HandlerResult::from_reconciled(&resolved.user_id, &reconciled);
    result.resolved_via = Some(resolved.via.to_string());
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn notify(
    state: &AppState,
    raw: &RawEvent,
    user_id: &UserId,
    reconciled: &Reconciled,
    amount_minor: Option<i64>,
    currency: Option<String>,
    customer_name: Option<String>,
    customer_email: Option<String>,
) -> bool {
    let Some(record) = &reconciled.record else {
        return false;
    };

    // Detached: the acknowledgement never waits on the messaging API.
    let _handle = state.notifier.spawn(SubscriptionNotice {
        event_type: raw.event_type.clone(),
        user_id: user_id.clone(),
        plan: record.plan,
        amount_minor,
        currency,
        customer_id: record.processor_customer_id.clone(),
        subscription_id: record.processor_subscription_id.clone(),
        customer_name,
        customer_email,
    });
    true
}
