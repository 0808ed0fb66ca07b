//! Stripe integration.
//!
//! Stripe is the payment processor. This service only calls it for:
//! - Customer lookup (last step of user resolution)
//! - Scheduling cancellation at period end
//!
//! Everything else arrives as webhooks.

pub mod client;
pub mod types;

pub use client::StripeClient;
pub use client::StripeError;
pub use types::*;
