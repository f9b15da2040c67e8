//! Delivery ledger for webhook events
//!
//! Stripe delivers at least once. Every event id is claimed here before it is
//! applied so a redelivered event that already finished is acknowledged
//! without touching the projection again. A redelivery racing a claim that is
//! still being processed is told so, and must not be acknowledged.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::StripeEvent;

/// A claim left in `processing` longer than this may be taken over.
pub const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingResult {
    Processing,
    Success,
    Skipped,
    Error,
}

impl ProcessingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingResult::Processing => "processing",
            ProcessingResult::Success => "success",
            ProcessingResult::Skipped => "skipped",
            ProcessingResult::Error => "error",
        }
    }
}

/// Result of trying to claim an event for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This delivery holds exclusive processing rights
    Claimed,
    /// The event already finished as `success` or `skipped`
    Completed { status: String },
    /// Another delivery holds a live claim on the event
    InFlight,
}

impl ClaimOutcome {
    /// Classify the stored status of an event this delivery could not claim
    pub fn from_unclaimed_status(status: Option<&str>) -> Self {
        match status {
            Some(status @ ("success" | "skipped")) => ClaimOutcome::Completed {
                status: status.to_string(),
            },
            // live `processing`, or an `error` row reclaimed between the two queries
            _ => ClaimOutcome::InFlight,
        }
    }
}

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Atomically claim `event`.
    ///
    /// New events are claimed. Events previously recorded as `error`, or
    /// stuck in `processing` past [`PROCESSING_TIMEOUT_MINUTES`], are
    /// reclaimed. A finished event is [`ClaimOutcome::Completed`]; a live
    /// `processing` claim is [`ClaimOutcome::InFlight`].
    async fn claim(&self, event: &StripeEvent) -> BillingResult<ClaimOutcome>;

    /// Record the final result of a claimed event
    async fn record_result(
        &self,
        stripe_event_id: &str,
        result: ProcessingResult,
        error_message: Option<&str>,
    ) -> BillingResult<()>;
}

/// [`DeliveryLedger`] backed by the `stripe_webhook_events` table
#[derive(Clone)]
pub struct PgDeliveryLedger {
    pool: PgPool,
}

impl PgDeliveryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLedger for PgDeliveryLedger {
    async fn claim(&self, event: &StripeEvent) -> BillingResult<ClaimOutcome> {
        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        // Only one concurrent delivery gets a row back from RETURNING.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (id, stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, $4, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT('Reclaimed from ', stripe_webhook_events.processing_result, ' at ', NOW()::TEXT)
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at < NOW() - make_interval(mins => $5))
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event.id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            e
        })?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT processing_result FROM stripe_webhook_events WHERE stripe_event_id = $1",
        )
        .bind(&event.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ClaimOutcome::from_unclaimed_status(
            existing.as_ref().map(|(status,)| status.as_str()),
        ))
    }

    async fn record_result(
        &self,
        stripe_event_id: &str,
        result: ProcessingResult,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(result.as_str())
        .bind(error_message)
        .bind(stripe_event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
