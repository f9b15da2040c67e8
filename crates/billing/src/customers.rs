//! Customer projections and the storage they live in
//!
//! A projection mirrors one Stripe customer and its current subscription for
//! exactly one local user. The reconciliation core only talks to storage
//! through [`CustomerStore`] and [`UserRegistry`].

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::LookupKey;

/// Local mirror of a Stripe customer/subscription pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CustomerProjection {
    pub id: Uuid,
    /// Owning user; deleting the user cascades to the projection
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: Option<String>,
    pub tier: i32,
    /// `created` timestamp of the newest provider event applied to this row
    pub last_event_at: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl CustomerProjection {
    pub fn has_subscription(&self) -> bool {
        self.stripe_subscription_id.is_some()
    }
}

/// Fields supplied when a projection is first created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomerProjection {
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub last_event_at: i64,
}

/// Durable keyed storage for customer projections.
///
/// Every operation is atomic for a single row. Writes are conditional on
/// `last_event_at`: a write carrying an older event timestamp than the stored
/// row affects nothing and reports `false`.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Projection whose `key` column equals `value`.
    ///
    /// Subscription ids are not unique; when several rows share one, the most
    /// recently updated row wins, ties going to the newest `last_event_at`.
    async fn find_by(&self, key: LookupKey, value: &str)
        -> BillingResult<Option<CustomerProjection>>;

    /// Insert a projection with no subscription and tier 0.
    ///
    /// Fails with `BillingError::Conflict` when the user or the Stripe
    /// customer id is already linked.
    async fn create(&self, new: NewCustomerProjection) -> BillingResult<CustomerProjection>;

    /// Persist subscription id, tier and `last_event_at` of `projection`.
    async fn update(&self, projection: &CustomerProjection) -> BillingResult<bool>;

    /// Delete the projection. Returns false when no row matched.
    async fn delete(&self, id: Uuid) -> BillingResult<bool>;
}

/// Lookup of local users by email
#[async_trait]
pub trait UserRegistry: Send + Sync {
    async fn find_user_id_by_email(&self, email: &str) -> BillingResult<Option<Uuid>>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// [`CustomerStore`] backed by the `customers` table
#[derive(Clone)]
pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerStore for PgCustomerStore {
    async fn find_by(
        &self,
        key: LookupKey,
        value: &str,
    ) -> BillingResult<Option<CustomerProjection>> {
        let query = match key {
            LookupKey::CustomerId => {
                r#"
                SELECT id, user_id, stripe_customer_id, stripe_subscription_id,
                       tier, last_event_at, created_at, updated_at
                FROM customers
                WHERE stripe_customer_id = $1
                LIMIT 1
                "#
            }
            LookupKey::SubscriptionId => {
                r#"
                SELECT id, user_id, stripe_customer_id, stripe_subscription_id,
                       tier, last_event_at, created_at, updated_at
                FROM customers
                WHERE stripe_subscription_id = $1
                ORDER BY updated_at DESC, last_event_at DESC
                LIMIT 1
                "#
            }
        };

        let projection = sqlx::query_as::<_, CustomerProjection>(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(projection)
    }

    async fn create(&self, new: NewCustomerProjection) -> BillingResult<CustomerProjection> {
        let projection = sqlx::query_as::<_, CustomerProjection>(
            r#"
            INSERT INTO customers (
                id, user_id, stripe_customer_id, stripe_subscription_id,
                tier, last_event_at, created_at, updated_at
            ) VALUES ($1, $2, $3, NULL, 0, $4, NOW(), NOW())
            RETURNING id, user_id, stripe_customer_id, stripe_subscription_id,
                      tier, last_event_at, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.stripe_customer_id)
        .bind(new.last_event_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(projection)
    }

    async fn update(&self, projection: &CustomerProjection) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET stripe_subscription_id = $2,
                tier = $3,
                last_event_at = $4,
                updated_at = NOW()
            WHERE id = $1 AND last_event_at <= $4
            "#,
        )
        .bind(projection.id)
        .bind(&projection.stripe_subscription_id)
        .bind(projection.tier)
        .bind(projection.last_event_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// [`UserRegistry`] backed by the `users` table
#[derive(Clone)]
pub struct PgUserRegistry {
    pool: PgPool,
}

impl PgUserRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRegistry for PgUserRegistry {
    async fn find_user_id_by_email(&self, email: &str) -> BillingResult<Option<Uuid>> {
        let user: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1 LIMIT 1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user.map(|(id,)| id))
    }
}
