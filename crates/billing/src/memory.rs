//! In-memory collaborators
//!
//! Same contracts as the PostgreSQL implementations, each operation atomic
//! under a single lock. Used by the test suites and for local runs without a
//! database.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::customers::{CustomerProjection, CustomerStore, NewCustomerProjection, UserRegistry};
use crate::error::{BillingError, BillingResult};
use crate::events::{LookupKey, StripeEvent};
use crate::ledger::{ClaimOutcome, DeliveryLedger, ProcessingResult, PROCESSING_TIMEOUT_MINUTES};

#[derive(Debug, Default)]
pub struct InMemoryCustomerStore {
    rows: RwLock<HashMap<Uuid, CustomerProjection>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored projection
    pub async fn all(&self) -> Vec<CustomerProjection> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Remove every projection owned by `user_id`, as the user cascade does.
    pub async fn remove_user(&self, user_id: Uuid) -> usize {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.user_id != user_id);
        before - rows.len()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn find_by(
        &self,
        key: LookupKey,
        value: &str,
    ) -> BillingResult<Option<CustomerProjection>> {
        let rows = self.rows.read().await;
        let found = rows
            .values()
            .filter(|row| match key {
                LookupKey::CustomerId => row.stripe_customer_id == value,
                LookupKey::SubscriptionId => row.stripe_subscription_id.as_deref() == Some(value),
            })
            .max_by_key(|row| (row.updated_at, row.last_event_at));
        Ok(found.cloned())
    }

    async fn create(&self, new: NewCustomerProjection) -> BillingResult<CustomerProjection> {
        let mut rows = self.rows.write().await;

        if rows.values().any(|row| row.user_id == new.user_id) {
            return Err(BillingError::Conflict(format!(
                "user {} already has a customer projection",
                new.user_id
            )));
        }
        if rows
            .values()
            .any(|row| row.stripe_customer_id == new.stripe_customer_id)
        {
            return Err(BillingError::Conflict(format!(
                "stripe customer {} already has a projection",
                new.stripe_customer_id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let projection = CustomerProjection {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            stripe_customer_id: new.stripe_customer_id,
            stripe_subscription_id: None,
            tier: 0,
            last_event_at: new.last_event_at,
            created_at: now,
            updated_at: now,
        };
        rows.insert(projection.id, projection.clone());
        Ok(projection)
    }

    async fn update(&self, projection: &CustomerProjection) -> BillingResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&projection.id) {
            Some(row) if row.last_event_at <= projection.last_event_at => {
                row.stripe_subscription_id = projection.stripe_subscription_id.clone();
                row.tier = projection.tier;
                row.last_event_at = projection.last_event_at;
                row.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> BillingResult<bool> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserRegistry {
    users: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryUserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return its id
    pub async fn add_user(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users.write().await.insert(email.to_string(), id);
        id
    }

    pub async fn remove_user(&self, email: &str) -> Option<Uuid> {
        self.users.write().await.remove(email)
    }
}

#[async_trait]
impl UserRegistry for InMemoryUserRegistry {
    async fn find_user_id_by_email(&self, email: &str) -> BillingResult<Option<Uuid>> {
        Ok(self.users.read().await.get(email).copied())
    }
}

#[derive(Debug)]
struct LedgerEntry {
    result: ProcessingResult,
    started_at: Instant,
    error_message: Option<String>,
}

#[derive(Debug)]
pub struct InMemoryDeliveryLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    processing_timeout: Duration,
}

impl Default for InMemoryDeliveryLedger {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            processing_timeout: Duration::from_secs(PROCESSING_TIMEOUT_MINUTES as u64 * 60),
        }
    }
}

impl InMemoryDeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processing_timeout(processing_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            processing_timeout,
        }
    }

    pub async fn status(&self, stripe_event_id: &str) -> Option<ProcessingResult> {
        self.entries
            .lock()
            .await
            .get(stripe_event_id)
            .map(|entry| entry.result)
    }

    pub async fn error_message(&self, stripe_event_id: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(stripe_event_id)
            .and_then(|entry| entry.error_message.clone())
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryDeliveryLedger {
    async fn claim(&self, event: &StripeEvent) -> BillingResult<ClaimOutcome> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(&event.id) {
            let reclaimable = match entry.result {
                ProcessingResult::Error => true,
                ProcessingResult::Processing => {
                    entry.started_at.elapsed() > self.processing_timeout
                }
                ProcessingResult::Success | ProcessingResult::Skipped => false,
            };
            if !reclaimable {
                return Ok(ClaimOutcome::from_unclaimed_status(Some(entry.result.as_str())));
            }
            entry.result = ProcessingResult::Processing;
            entry.started_at = Instant::now();
            return Ok(ClaimOutcome::Claimed);
        }

        entries.insert(
            event.id.clone(),
            LedgerEntry {
                result: ProcessingResult::Processing,
                started_at: Instant::now(),
                error_message: None,
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn record_result(
        &self,
        stripe_event_id: &str,
        result: ProcessingResult,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        if let Some(entry) = self.entries.lock().await.get_mut(stripe_event_id) {
            entry.result = result;
            entry.error_message = error_message.map(str::to_string);
        }
        Ok(())
    }
}
