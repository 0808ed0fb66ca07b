//! Subscription reconciliation.
//!
//! One pass converges a user's subscription rows onto a single canonical
//! record:
//!
//! 1. Fetch every row for the user, newest first.
//! 2. No rows: insert one from the patch if the caller's [`CreatePolicy`]
//!    allows it.
//! 3. Otherwise merge the patch onto `rows[0]` (present fields overwrite,
//!    absent fields are kept) and delete every other row.
//!
//! There is no locking. Two concurrent passes for a brand-new user can both
//! insert; the next pass for that user collapses the extra row.
//!
//! Store failures are returned as-is and never retried here.

use serde::Serialize;

use plansync_core::{NewSubscription, Plan, SubscriptionId, SubscriptionPatch, SubscriptionRecord, UserId};
use plansync_store::{Result, Store};

/// What to do when the user has no subscription row yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
    /// Leave the user without a row.
    UpdateOnly,
    /// Insert a row, using this plan when the patch names none.
    CreateWith(Plan),
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// A new canonical row was inserted.
    Created,
    /// The canonical row was updated.
    Updated,
    /// The canonical row already matched.
    Unchanged,
    /// No row existed and the policy forbade creating one.
    Skipped,
}

/// Result of [`reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// What happened.
    pub outcome: ReconcileOutcome,
    /// The canonical row after the pass, `None` when skipped.
    pub record: Option<SubscriptionRecord>,
    /// Processor subscription id of the canonical row before the pass.
    pub previous_subscription_id: Option<String>,
    /// Duplicate rows deleted.
    pub collapsed: u64,
}

impl Reconciled {
    /// Whether this pass attached a processor subscription the user did not
    /// have before.
    ///
    /// Replays and updates carrying the same subscription id never count as
    /// new.
    #[must_use]
    pub fn starts_new_subscription(&self) -> bool {
        let current = self
            .record
            .as_ref()
            .and_then(|r| r.processor_subscription_id.as_deref());

        current.is_some() && current != self.previous_subscription_id.as_deref()
    }
}

/// Run one reconciliation pass for `user_id`.
///
/// # Errors
///
/// Returns the first store error; rows already written stay written and the
/// next pass finishes the job.
pub async fn reconcile(
    store: &dyn Store,
    user_id: &UserId,
    patch: &SubscriptionPatch,
    policy: CreatePolicy,
) -> Result<Reconciled> {
    let records = store.subscriptions_for_user(user_id).await?;

    let Some((canonical, duplicates)) = records.split_first() else {
        return create(store, user_id, patch, policy).await;
    };

    let previous_subscription_id = canonical.processor_subscription_id.clone();

    let (outcome, record) = if patch.changes(canonical) {
        let updated = store.update_subscription(&canonical.id, patch).await?;
        (ReconcileOutcome::Updated, updated)
    } else {
        (ReconcileOutcome::Unchanged, canonical.clone())
    };

    let collapsed = if duplicates.is_empty() {
        0
    } else {
        let ids: Vec<SubscriptionId> = duplicates.iter().map(|r| r.id).collect();
        let deleted = store.delete_subscriptions(&ids).await?;
        tracing::info!(
            user_id = %user_id,
            canonical_id = %record.id,
            deleted = deleted,
            "Collapsed duplicate subscription records"
        );
        deleted
    };

    if !record.entitlement_is_backed() {
        tracing::warn!(
            user_id = %user_id,
            subscription_record = %record.id,
            plan = %record.plan,
            "Paid record is active without a processor subscription"
        );
    }

    tracing::debug!(
        user_id = %user_id,
        outcome = ?outcome,
        plan = %record.plan,
        status = %record.status,
        "Reconciled subscription"
    );

    Ok(Reconciled {
        outcome,
        record: Some(record),
        previous_subscription_id,
        collapsed,
    })
}

async fn create(
    store: &dyn Store,
    user_id: &UserId,
    patch: &SubscriptionPatch,
    policy: CreatePolicy,
) -> Result<Reconciled> {
    let CreatePolicy::CreateWith(default_plan) = policy else {
        tracing::debug!(user_id = %user_id, "No subscription record to update");
        return Ok(Reconciled {
            outcome: ReconcileOutcome::Skipped,
            record: None,
            previous_subscription_id: None,
            collapsed: 0,
        });
    };

    let record = store
        .insert_subscription(&NewSubscription::from_patch(user_id.clone(), patch, default_plan))
        .await?;

    tracing::info!(
        user_id = %user_id,
        plan = %record.plan,
        status = %record.status,
        "Created subscription record"
    );

    Ok(Reconciled {
        outcome: ReconcileOutcome::Created,
        record: Some(record),
        previous_subscription_id: None,
        collapsed: 0,
    })
}
