//! Relational storage layer for plansync.
//!
//! This crate provides the subscription and user tables behind a single
//! [`Store`] trait with two implementations:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, with embedded migrations
//! - [`MemoryStore`]: in-process tables with a write log, used by tests and
//!   local development
//!
//! # Consistency
//!
//! The store offers no locking and no uniqueness on `subscriptions.user_id`.
//! Callers get correctness from the write pattern: fetch every record for a
//! user, merge onto the newest, delete the rest.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgStore;

use async_trait::async_trait;
use plansync_core::{
    NewSubscription, NewUser, SubscriptionId, SubscriptionPatch, SubscriptionRecord, UserId,
    UserProfile, UserRecord, UserRecordId,
};

/// The storage trait defining all database operations.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// List every subscription record for a user, newest first.
    ///
    /// Ordered by `created_at` descending, then `updated_at` descending.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn subscriptions_for_user(&self, user_id: &UserId) -> Result<Vec<SubscriptionRecord>>;

    /// List every subscription record carrying a processor customer reference,
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn subscriptions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionRecord>>;

    /// Insert a subscription record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_subscription(&self, new: &NewSubscription) -> Result<SubscriptionRecord>;

    /// Merge a patch onto one record by id and return the stored result.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    async fn update_subscription(
        &self,
        id: &SubscriptionId,
        patch: &SubscriptionPatch,
    ) -> Result<SubscriptionRecord>;

    /// Delete a set of subscription records by id. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn delete_subscriptions(&self, ids: &[SubscriptionId]) -> Result<u64>;

    /// Delete every subscription record for a user. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn delete_subscriptions_for_user(&self, user_id: &UserId) -> Result<u64>;

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Get a user by identity-provider subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn user_by_external_id(&self, external_id: &UserId) -> Result<Option<UserRecord>>;

    /// Insert a user record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if the subject already exists.
    async fn insert_user(&self, new: &NewUser) -> Result<UserRecord>;

    /// Update profile fields by identity-provider subject.
    ///
    /// Absent fields in `profile` keep their stored value. Returns `None` when
    /// no user has that subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn update_user(
        &self,
        external_id: &UserId,
        profile: &UserProfile,
    ) -> Result<Option<UserRecord>>;

    /// Delete a user record by id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn delete_user(&self, id: &UserRecordId) -> Result<()>;
}
