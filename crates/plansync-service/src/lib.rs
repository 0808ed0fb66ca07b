//! Plansync HTTP service.
//!
//! Keeps one subscription record per user in step with the payment
//! processor and the identity provider:
//!
//! - Processor webhooks: verified, routed by type, resolved to a user and
//!   reconciled onto the canonical record (duplicates collapsed)
//! - Identity webhooks: user mirror and default free subscription
//! - Notifications for new subscriptions, sent on a detached task
//! - A small authenticated API to read, cancel or downgrade a subscription
//!
//! # Delivery hazards
//!
//! Webhooks may be duplicated, reordered or concurrent. Every handler is a
//! merge, never a blind overwrite, and unknown event types are acknowledged
//! so the sender does not retry them forever.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod auth;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod notify;
pub mod reconcile;
pub mod resolver;
pub mod routes;
pub mod signature;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use error::{ApiError, WebhookError};
pub use notify::{Notifier, SubscriptionNotice};
pub use reconcile::{reconcile, CreatePolicy, ReconcileOutcome, Reconciled};
pub use routes::create_router;
pub use signature::{sign_identity, sign_processor, SignatureError};
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
