//! Webhook handlers for the payment processor and the identity provider.
//!
//! Both take the raw body so signatures are checked over the exact bytes
//! received.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::dispatch::{dispatch, Dispatched, HandlerResult};
use crate::error::WebhookError;
use crate::events::{IdentityEvent, RawEvent, RawIdentityEvent};
use crate::identity::sync_identity_event;
use crate::signature::{verify_identity, verify_processor};
use crate::state::AppState;

/// Processor webhook acknowledgement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    /// Always true.
    pub received: bool,
    /// Event type.
    pub event_type: String,
    /// Event ID.
    pub event_id: String,
    /// Set when no handler exists for the type.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unhandled: bool,
    /// Handler details.
    #[serde(flatten)]
    pub result: HandlerResult,
}

/// Processor webhook failure body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookFailure {
    /// Error description.
    pub error: String,
    /// Event type, when the envelope was readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Event ID, when the envelope was readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

fn failure(err: &WebhookError, event: Option<&RawEvent>) -> Response {
    let body = WebhookFailure {
        error: err.to_string(),
        event_type: event.map(|e| e.event_type.clone()),
        event_id: event.map(|e| e.id.clone()),
    };
    (err.status(), Json(body)).into_response()
}

/// Handle payment processor webhooks.
pub async fn processor_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let now = chrono::Utc::now().timestamp();

    if let Err(e) = verify_processor(
        state.config.stripe_webhook_secret.as_deref(),
        &headers,
        &body,
        state.config.webhook_tolerance_seconds,
        now,
    ) {
        let err = WebhookError::from(e);
        if err.status().is_server_error() {
            tracing::error!(error = %err, "Processor webhook cannot be verified");
        } else {
            tracing::warn!(error = %err, "Rejected processor webhook signature");
        }
        return failure(&err, None);
    }

    let event: RawEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            let err = WebhookError::from(e);
            tracing::warn!(error = %err, "Malformed processor webhook envelope");
            return failure(&err, None);
        }
    };

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        created = event.created,
        "Received processor webhook"
    );

    match dispatch(&state, &event).await {
        Ok(Dispatched::Handled(result)) => Json(WebhookAck {
            received: true,
            event_type: event.event_type,
            event_id: event.id,
            unhandled: false,
            result,
        })
        .into_response(),
        Ok(Dispatched::Unhandled) => Json(WebhookAck {
            received: true,
            event_type: event.event_type,
            event_id: event.id,
            unhandled: true,
            result: HandlerResult::default(),
        })
        .into_response(),
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!(
                    error = %err,
                    event_type = %event.event_type,
                    event_id = %event.id,
                    "Processor webhook handler failed"
                );
            } else {
                tracing::warn!(
                    error = %err,
                    event_type = %event.event_type,
                    event_id = %event.id,
                    "Processor webhook rejected"
                );
            }
            failure(&err, Some(&event))
        }
    }
}

/// Handle identity-provider webhooks.
pub async fn identity_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    match handle_identity(&state, &headers, &body).await {
        Ok(message) => (StatusCode::OK, message),
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!(error = %err, "Identity webhook failed");
            } else {
                tracing::warn!(error = %err, "Identity webhook rejected");
            }
            (err.status(), err.to_string())
        }
    }
}

async fn handle_identity(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String, WebhookError> {
    verify_identity(
        state.config.identity_webhook_secret.as_deref(),
        headers,
        body,
        state.config.webhook_tolerance_seconds,
        chrono::Utc::now().timestamp(),
    )?;

    let raw: RawIdentityEvent = serde_json::from_slice(body)?;
    tracing::info!(event_type = %raw.event_type, "Received identity webhook");

    let event = IdentityEvent::decode(raw)?;
    let outcome = sync_identity_event(state.store.as_ref(), event).await?;

    Ok(outcome.to_string())
}
