//! Identity-provider lifecycle sync.
//!
//! Mirrors user create/update/delete into the user table. A created user also
//! gets a default free subscription, unless a paid one already exists from a
//! checkout that arrived first.

use std::fmt;

use plansync_core::{NewUser, Plan, SubscriptionPatch, UserId};
use plansync_store::{Store, StoreError};

use crate::error::WebhookError;
use crate::events::{DeletedIdentityUser, IdentityEvent, IdentityUser};
use crate::reconcile::{reconcile, CreatePolicy};

/// What a sync did. Rendered as the plain-text response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// User and default subscription created.
    Created,
    /// The user already existed.
    AlreadyExists,
    /// Profile updated.
    Updated,
    /// No such user; nothing to do.
    UnknownUser,
    /// User and its subscription records deleted.
    Deleted {
        /// Subscription records removed.
        subscriptions: u64,
    },
    /// Event type not handled.
    Unhandled(String),
}

impl fmt::Display for IdentityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("user created"),
            Self::AlreadyExists => f.write_str("user already exists"),
            Self::Updated => f.write_str("user updated"),
            Self::UnknownUser => f.write_str("user not found, nothing to do"),
            Self::Deleted { subscriptions } => {
                write!(f, "user deleted ({subscriptions} subscription records)")
            }
            Self::Unhandled(event_type) => write!(f, "unhandled event type {event_type}"),
        }
    }
}

/// Apply one identity event to the store.
///
/// # Errors
///
/// `MissingEmail` for a created user without an address, `Payload` for a
/// blank subject, and any store failure.
pub async fn sync_identity_event(
    store: &dyn Store,
    event: IdentityEvent,
) -> Result<IdentityOutcome, WebhookError> {
    match event {
        IdentityEvent::UserCreated(user) => user_created(store, &user).await,
        IdentityEvent::UserUpdated(user) => user_updated(store, &user).await,
        IdentityEvent::UserDeleted(user) => user_deleted(store, &user).await,
        IdentityEvent::Unhandled(event_type) => {
            tracing::debug!(event_type = %event_type, "Unhandled identity event");
            Ok(IdentityOutcome::Unhandled(event_type))
        }
    }
}

fn subject(id: &str) -> Result<UserId, WebhookError> {
    UserId::new(id).map_err(|e| WebhookError::Payload(e.to_string()))
}

async fn user_created(store: &dyn Store, user: &IdentityUser) -> Result<IdentityOutcome, WebhookError> {
    let external_id = subject(&user.id)?;
    let email = user
        .primary_email()
        .ok_or_else(|| WebhookError::MissingEmail {
            user_id: user.id.clone(),
        })?
        .to_string();

    if store.user_by_external_id(&external_id).await?.is_some() {
        tracing::debug!(user_id = %external_id, "User already exists");
        ensure_subscription(store, &external_id).await?;
        return Ok(IdentityOutcome::AlreadyExists);
    }

    let new = NewUser {
        external_id: external_id.clone(),
        email,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    };

    match store.insert_user(&new).await {
        Ok(record) => {
            tracing::info!(user_id = %external_id, user_record = %record.id, "User created");
        }
        Err(StoreError::Duplicate { .. }) => {
            tracing::debug!(user_id = %external_id, "User created concurrently");
            ensure_subscription(store, &external_id).await?;
            return Ok(IdentityOutcome::AlreadyExists);
        }
        Err(e) => return Err(e.into()),
    }

    ensure_subscription(store, &external_id).await?;

    Ok(IdentityOutcome::Created)
}

/// Give the user a free record if they have none. Also repairs a user whose
/// earlier delivery failed between the two inserts.
async fn ensure_subscription(store: &dyn Store, user_id: &UserId) -> Result<(), WebhookError> {
    // An empty patch never overwrites a record a checkout already wrote.
    reconcile(
        store,
        user_id,
        &SubscriptionPatch::new(),
        CreatePolicy::CreateWith(Plan::Free),
    )
    .await?;
    Ok(())
}

async fn user_updated(store: &dyn Store, user: &IdentityUser) -> Result<IdentityOutcome, WebhookError> {
    let external_id = subject(&user.id)?;

    match store.update_user(&external_id, &user.profile()).await? {
        Some(_) => {
            tracing::info!(user_id = %external_id, "User updated");
            Ok(IdentityOutcome::Updated)
        }
        None => {
            tracing::debug!(user_id = %external_id, "Update for unknown user");
            Ok(IdentityOutcome::UnknownUser)
        }
    }
}

async fn user_deleted(
    store: &dyn Store,
    user: &DeletedIdentityUser,
) -> Result<IdentityOutcome, WebhookError> {
    let external_id = subject(&user.id)?;

    let Some(record) = store.user_by_external_id(&external_id).await? else {
        tracing::debug!(user_id = %external_id, "Delete for unknown user");
        return Ok(IdentityOutcome::UnknownUser);
    };

    // Dependent rows first.
    let subscriptions = store.delete_subscriptions_for_user(&external_id).await?;

    match store.delete_user(&record.id).await {
        Ok(()) | Err(StoreError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        user_id = %external_id,
        subscriptions = subscriptions,
        "User deleted"
    );

    Ok(IdentityOutcome::Deleted { subscriptions })
}
