//! In-memory store.
//!
//! Holds both tables in a single mutex and records every write in an
//! operation log, so tests can assert on what was written and in which order.
//! Writes can be made to fail on demand to exercise error paths.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use plansync_core::{
    NewSubscription, NewUser, SubscriptionId, SubscriptionPatch, SubscriptionRecord, UserId,
    UserProfile, UserRecord, UserRecordId,
};

use crate::error::{Result, StoreError};
use crate::Store;

/// A write performed against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A subscription record was inserted.
    InsertSubscription(SubscriptionId),
    /// A subscription record was updated by id.
    UpdateSubscription(SubscriptionId),
    /// A set of subscription records was deleted by id.
    DeleteSubscriptions(Vec<SubscriptionId>),
    /// Every subscription record of a user was deleted.
    DeleteSubscriptionsForUser(UserId),
    /// A user record was inserted.
    InsertUser(UserRecordId),
    /// A user record was updated.
    UpdateUser(UserRecordId),
    /// A user record was deleted.
    DeleteUser(UserRecordId),
}

#[derive(Default)]
struct Tables {
    /// Subscription rows with their insertion sequence.
    subscriptions: Vec<(u64, SubscriptionRecord)>,
    users: Vec<UserRecord>,
    ops: Vec<StoreOp>,
    next_seq: u64,
    fail_writes: bool,
}

impl Tables {
    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    fn push_subscription(&mut self, record: SubscriptionRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.subscriptions.push((seq, record));
    }

    fn sorted_where(&self, pred: impl Fn(&SubscriptionRecord) -> bool) -> Vec<SubscriptionRecord> {
        let mut rows: Vec<&(u64, SubscriptionRecord)> =
            self.subscriptions.iter().filter(|(_, r)| pred(r)).collect();
        rows.sort_by(|(sa, a), (sb, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(sb.cmp(sa))
        });
        rows.into_iter().map(|(_, r)| r.clone()).collect()
    }
}

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    /// Insert a fully specified subscription record, bypassing the write log.
    ///
    /// Used to set up historical state such as duplicate rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn seed_subscription(&self, record: SubscriptionRecord) -> Result<()> {
        self.lock()?.push_subscription(record);
        Ok(())
    }

    /// Insert a fully specified user record, bypassing the write log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn seed_user(&self, record: UserRecord) -> Result<()> {
        self.lock()?.users.push(record);
        Ok(())
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn set_fail_writes(&self, fail: bool) -> Result<()> {
        self.lock()?.fail_writes = fail;
        Ok(())
    }

    /// Writes performed so far, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn writes(&self) -> Result<Vec<StoreOp>> {
        Ok(self.lock()?.ops.clone())
    }

    /// Every subscription record in the store, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn all_subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        Ok(self.lock()?.sorted_where(|_| true))
    }

    /// Every user record in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn all_users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.lock()?.users.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn subscriptions_for_user(&self, user_id: &UserId) -> Result<Vec<SubscriptionRecord>> {
        Ok(self.lock()?.sorted_where(|r| &r.user_id == user_id))
    }

    async fn subscriptions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionRecord>> {
        Ok(self
            .lock()?
            .sorted_where(|r| r.processor_customer_id.as_deref() == Some(customer_id)))
    }

    async fn insert_subscription(&self, new: &NewSubscription) -> Result<SubscriptionRecord> {
        let mut tables = self.lock()?;
        tables.check_writable()?;

        let now = Utc::now();
        let record = SubscriptionRecord {
            id: SubscriptionId::generate(),
            user_id: new.user_id.clone(),
            plan: new.plan,
            status: new.status,
            processor_customer_id: new.processor_customer_id.clone(),
            processor_subscription_id: new.processor_subscription_id.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.ops.push(StoreOp::InsertSubscription(record.id));
        tables.push_subscription(record.clone());
        Ok(record)
    }

    async fn update_subscription(
        &self,
        id: &SubscriptionId,
        patch: &SubscriptionPatch,
    ) -> Result<SubscriptionRecord> {
        let mut tables = self.lock()?;
        tables.check_writable()?;

        let record = tables
            .subscriptions
            .iter_mut()
            .map(|(_, r)| r)
            .find(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            })?;

        let mut merged = record.clone();
        patch.apply(&mut merged, Utc::now());
        // An update-by-id always touches the row, like the SQL statement does.
        merged.updated_at = Utc::now();
        *record = merged.clone();

        tables.ops.push(StoreOp::UpdateSubscription(*id));
        Ok(merged)
    }

    async fn delete_subscriptions(&self, ids: &[SubscriptionId]) -> Result<u64> {
        let mut tables = self.lock()?;
        tables.check_writable()?;

        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|(_, r)| !ids.contains(&r.id));
        let deleted = before - tables.subscriptions.len();

        tables.ops.push(StoreOp::DeleteSubscriptions(ids.to_vec()));
        Ok(deleted as u64)
    }

    async fn delete_subscriptions_for_user(&self, user_id: &UserId) -> Result<u64> {
        let mut tables = self.lock()?;
        tables.check_writable()?;

        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|(_, r)| &r.user_id != user_id);
        let deleted = before - tables.subscriptions.len();

        tables
            .ops
            .push(StoreOp::DeleteSubscriptionsForUser(user_id.clone()));
        Ok(deleted as u64)
    }

    async fn user_by_external_id(&self, external_id: &UserId) -> Result<Option<UserRecord>> {
        Ok(self
            .lock()?
            .users
            .iter()
            .find(|u| &u.external_id == external_id)
            .cloned())
    }

    async fn insert_user(&self, new: &NewUser) -> Result<UserRecord> {
        let mut tables = self.lock()?;
        tables.check_writable()?;

        if tables.users.iter().any(|u| u.external_id == new.external_id) {
            return Err(StoreError::Duplicate {
                entity: "user",
                key: new.external_id.to_string(),
            });
        }

        let now = Utc::now();
        let record = UserRecord {
            id: UserRecordId::generate(),
            external_id: new.external_id.clone(),
            email: new.email.clone(),
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.ops.push(StoreOp::InsertUser(record.id));
        tables.users.push(record.clone());
        Ok(record)
    }

    async fn update_user(
        &self,
        external_id: &UserId,
        profile: &UserProfile,
    ) -> Result<Option<UserRecord>> {
        let mut tables = self.lock()?;
        tables.check_writable()?;

        let Some(user) = tables
            .users
            .iter_mut()
            .find(|u| &u.external_id == external_id)
        else {
            return Ok(None);
        };

        if let Some(email) = &profile.email {
            user.email.clone_from(email);
        }
        if profile.first_name.is_some() {
            user.first_name.clone_from(&profile.first_name);
        }
        if profile.last_name.is_some() {
            user.last_name.clone_from(&profile.last_name);
        }
        user.updated_at = Utc::now();
        let updated = user.clone();

        tables.ops.push(StoreOp::UpdateUser(updated.id));
        Ok(Some(updated))
    }

    async fn delete_user(&self, id: &UserRecordId) -> Result<()> {
        let mut tables = self.lock()?;
        tables.check_writable()?;

        let before = tables.users.len();
        tables.users.retain(|u| &u.id != id);
        if tables.users.len() == before {
            return Err(StoreError::NotFound {
                entity: "user",
                id: id.to_string(),
            });
        }

        tables.ops.push(StoreOp::DeleteUser(*id));
        Ok(())
    }
}
