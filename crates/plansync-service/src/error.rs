//! API and webhook error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use plansync_store::StoreError;

use crate::signature::SignatureError;
use crate::stripe::StripeError;

// ============================================================================
// Request API
// ============================================================================

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::Duplicate { entity, key } => {
                Self::Conflict(format!("{entity} already exists: {key}"))
            }
            StoreError::Database(msg)
            | StoreError::Serialization(msg)
            | StoreError::Unavailable(msg) => Self::Internal(msg),
        }
    }
}

// ============================================================================
// Webhooks
// ============================================================================

/// Failure while handling an inbound webhook.
///
/// Verification and payload errors are produced at the HTTP boundary;
/// everything else comes out of the handlers. [`WebhookError::status`] is the
/// single translation to an HTTP status: 4xx where a resend cannot help,
/// 5xx where the sender should retry.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Signature verification failed, or no secret is configured.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// A required setting is missing for this operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The body is not a well-formed event.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// No user could be resolved for the processor customer.
    #[error("no user found for customer {customer_id}")]
    UserNotFound {
        /// Processor customer reference.
        customer_id: String,
    },

    /// An identity user-created event carried no email address.
    #[error("user {user_id} has no email address")]
    MissingEmail {
        /// Identity-provider subject.
        user_id: String,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The payment processor API failed.
    #[error(transparent)]
    Processor(#[from] StripeError),
}

impl WebhookError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Signature(e) if e.is_configuration() => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Signature(_) | Self::Payload(_) | Self::MissingEmail { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Configuration(_)
            | Self::UserNotFound { .. }
            | Self::Store(_)
            | Self::Processor(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

impl From<plansync_core::CoreError> for WebhookError {
    fn from(err: plansync_core::CoreError) -> Self {
        Self::Payload(err.to_string())
    }
}
