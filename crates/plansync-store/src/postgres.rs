//! PostgreSQL implementation of [`Store`].
//!
//! Uses runtime-checked `sqlx` queries against the tables created by the
//! embedded migrations in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use plansync_core::{
    NewSubscription, NewUser, SubscriptionId, SubscriptionPatch, SubscriptionRecord, UserId,
    UserProfile, UserRecord, UserRecordId,
};

use crate::error::{Result, StoreError};
use crate::Store;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, status, processor_customer_id, \
     processor_subscription_id, created_at, updated_at";

const USER_COLUMNS: &str = "id, external_id, email, first_name, last_name, created_at, updated_at";

/// PostgreSQL-backed store with connection pooling.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with at most `max_connections` pooled connections.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan: String,
    status: String,
    processor_customer_id: Option<String>,
    processor_subscription_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            plan: row.plan.parse()?,
            status: row.status.parse()?,
            processor_customer_id: row.processor_customer_id,
            processor_subscription_id: row.processor_subscription_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    external_id: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: UserRecordId::from_uuid(row.id),
            external_id: UserId::new(row.external_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<SubscriptionRow>) -> Result<Vec<SubscriptionRecord>> {
    rows.into_iter().map(SubscriptionRecord::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn subscriptions_for_user(&self, user_id: &UserId) -> Result<Vec<SubscriptionRecord>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 ORDER BY created_at DESC, updated_at DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn subscriptions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionRecord>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE processor_customer_id = $1 ORDER BY created_at DESC, updated_at DESC"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn insert_subscription(&self, new: &NewSubscription) -> Result<SubscriptionRecord> {
        let row: SubscriptionRow = sqlx::query_as(&format!(
            "INSERT INTO subscriptions \
             (id, user_id, plan, status, processor_customer_id, processor_subscription_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(SubscriptionId::generate().as_uuid())
        .bind(new.user_id.as_str())
        .bind(new.plan.as_str())
        .bind(new.status.as_str())
        .bind(&new.processor_customer_id)
        .bind(&new.processor_subscription_id)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn update_subscription(
        &self,
        id: &SubscriptionId,
        patch: &SubscriptionPatch,
    ) -> Result<SubscriptionRecord> {
        // COALESCE keeps the stored value for every field the patch leaves out.
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "UPDATE subscriptions SET \
                 plan = COALESCE($2, plan), \
                 status = COALESCE($3, status), \
                 processor_customer_id = COALESCE($4, processor_customer_id), \
                 processor_subscription_id = COALESCE($5, processor_subscription_id), \
                 updated_at = now() \
             WHERE id = $1 RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(patch.plan.map(|p| p.as_str()))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.processor_customer_id)
        .bind(&patch.processor_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound {
            entity: "subscription",
            id: id.to_string(),
        })?
        .try_into()
    }

    async fn delete_subscriptions(&self, ids: &[SubscriptionId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ANY($1)")
            .bind(&uuids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_subscriptions_for_user(&self, user_id: &UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn user_by_external_id(&self, external_id: &UserId) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = $1"
        ))
        .bind(external_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRecord::try_from).transpose()
    }

    async fn insert_user(&self, new: &NewUser) -> Result<UserRecord> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "INSERT INTO users (id, external_id, email, first_name, last_name) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (external_id) DO NOTHING RETURNING {USER_COLUMNS}"
        ))
        .bind(UserRecordId::generate().as_uuid())
        .bind(new.external_id.as_str())
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::Duplicate {
            entity: "user",
            key: new.external_id.to_string(),
        })?
        .try_into()
    }

    async fn update_user(
        &self,
        external_id: &UserId,
        profile: &UserProfile,
    ) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET \
                 email = COALESCE($2, email), \
                 first_name = COALESCE($3, first_name), \
                 last_name = COALESCE($4, last_name), \
                 updated_at = now() \
             WHERE external_id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(external_id.as_str())
        .bind(&profile.email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRecord::try_from).transpose()
    }

    async fn delete_user(&self, id: &UserRecordId) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "user",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
