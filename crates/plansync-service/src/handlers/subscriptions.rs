//! Subscription handlers for the signed-in user.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use plansync_core::{Plan, SubscriptionPatch, SubscriptionRecord, SubscriptionStatus};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::reconcile::{reconcile, CreatePolicy};
use crate::state::AppState;

/// Subscription response.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Current plan.
    pub plan: Plan,
    /// Current status.
    pub status: SubscriptionStatus,
    /// Whether the user currently has paid access.
    pub paid_access: bool,
    /// Processor subscription reference.
    pub processor_subscription_id: Option<String>,
    /// Last write (ISO 8601), absent when the user has no record.
    pub updated_at: Option<String>,
}

impl From<&SubscriptionRecord> for SubscriptionResponse {
    fn from(record: &SubscriptionRecord) -> Self {
        Self {
            plan: record.plan,
            status: record.status,
            paid_access: record.grants_paid_access(),
            processor_subscription_id: record.processor_subscription_id.clone(),
            updated_at: Some(record.updated_at.to_rfc3339()),
        }
    }
}

impl SubscriptionResponse {
    fn none() -> Self {
        Self {
            plan: Plan::Free,
            status: SubscriptionStatus::Inactive,
            paid_access: false,
            processor_subscription_id: None,
            updated_at: None,
        }
    }
}

/// Cancellation response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Processor subscription reference.
    pub processor_subscription_id: String,
    /// Always true once scheduled.
    pub cancel_at_period_end: bool,
    /// When access ends (ISO 8601), if the processor reported it.
    pub access_until: Option<String>,
    /// Stored status, unchanged until the period ends.
    pub status: SubscriptionStatus,
}

/// Get the caller's canonical subscription.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let records = state.store.subscriptions_for_user(&auth.user_id).await?;

    Ok(Json(
        records
            .first()
            .map_or_else(SubscriptionResponse::none, SubscriptionResponse::from),
    ))
}

/// Schedule cancellation at the end of the current period.
///
/// Only the processor is told; the stored status stays as it is until the
/// processor sends `customer.subscription.deleted`.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CancelResponse>, ApiError> {
    let records = state.store.subscriptions_for_user(&auth.user_id).await?;

    let Some((record, subscription_id)) = records
        .first()
        .and_then(|r| r.processor_subscription_id.clone().map(|id| (r, id)))
    else {
        return Err(ApiError::Conflict(
            "No processor subscription to cancel".into(),
        ));
    };

    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| ApiError::Internal("Stripe not configured".into()))?;

    let subscription = stripe
        .cancel_at_period_end(&subscription_id)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                subscription_id = %subscription_id,
                "Stripe cancellation failed"
            );
            ApiError::ExternalService("Payment processor request failed".into())
        })?;

    tracing::info!(
        user_id = %auth.user_id,
        subscription_id = %subscription_id,
        "Cancellation scheduled at period end"
    );

    Ok(Json(CancelResponse {
        processor_subscription_id: subscription.id,
        cancel_at_period_end: subscription.cancel_at_period_end,
        access_until: subscription
            .current_period_end
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339()),
        status: record.status,
    }))
}

/// Move the caller to the free plan.
///
/// Refused while a paid processor subscription is still live; that has to go
/// through cancellation first.
pub async fn downgrade_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let records = state.store.subscriptions_for_user(&auth.user_id).await?;

    if let Some(record) = records.first() {
        let live_paid = record.plan.is_paid()
            && record.processor_subscription_id.is_some()
            && record.status != SubscriptionStatus::Canceled;
        if live_paid {
            return Err(ApiError::Conflict(
                "Cancel the paid subscription before downgrading".into(),
            ));
        }
    }

    let patch = SubscriptionPatch::new()
        .plan(Plan::Free)
        .status(SubscriptionStatus::Active);

    let reconciled = reconcile(
        state.store.as_ref(),
        &auth.user_id,
        &patch,
        CreatePolicy::CreateWith(Plan::Free),
    )
    .await?;

    tracing::info!(user_id = %auth.user_id, outcome = ?reconciled.outcome, "Downgraded to free");

    let record = reconciled
        .record
        .ok_or_else(|| ApiError::Internal("downgrade produced no record".into()))?;

    Ok(Json(SubscriptionResponse::from(&record)))
}
