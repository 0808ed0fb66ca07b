//! Core types for plansync.
//!
//! This crate provides the foundational types shared by the store and the
//! webhook service:
//!
//! - **Identifiers**: `UserId`, `SubscriptionId`, `UserRecordId`
//! - **Subscriptions**: `SubscriptionRecord`, `SubscriptionPatch`, `NewSubscription`
//! - **Plans and statuses**: `Plan`, `SubscriptionStatus` and the processor status mapping
//! - **Users**: `UserRecord`, `NewUser`, `UserProfile`
//!
//! # Canonical record
//!
//! A user should own exactly one subscription record. The store does not
//! enforce it, so readers always treat the most recently created record as
//! canonical and writers collapse the rest.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod subscription;
pub mod user;

pub use error::{CoreError, Result};
pub use ids::{IdError, SubscriptionId, UserId, UserRecordId};
pub use subscription::{
    NewSubscription, Plan, SubscriptionPatch, SubscriptionRecord, SubscriptionStatus,
};
pub use user::{NewUser, UserProfile, UserRecord};
