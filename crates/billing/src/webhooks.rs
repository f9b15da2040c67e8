//! Stripe webhook handling
//!
//! Verifies deliveries, classifies them and applies the matching state
//! transition to the customer projections.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;

use crate::customers::{
    CustomerProjection, CustomerStore, NewCustomerProjection, PgCustomerStore, PgUserRegistry,
    UserRegistry,
};
use crate::error::{AuthError, BillingError, BillingResult};
use crate::events::{classify, LookupKey, ReconciliationAction, StripeEvent};
use crate::ledger::{ClaimOutcome, DeliveryLedger, PgDeliveryLedger, ProcessingResult};
use crate::signature::WebhookVerifier;
use crate::telemetry::{report_err, ErrorReporter, FailureStage, ReportContext, ReportedError};
use crate::tier::{resolve_tier, FREE_TIER};

/// What happened to a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The projection was changed
    Applied,
    /// The event was valid but changed nothing
    Skipped(SkipReason),
    /// The event id was already handled
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A projection for the customer already exists
    AlreadyExists,
    /// A newer event has already been applied to the projection
    StaleEvent,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Skipped(SkipReason::AlreadyExists) => "skipped_already_exists",
            ReconcileOutcome::Skipped(SkipReason::StaleEvent) => "skipped_stale_event",
            ReconcileOutcome::Duplicate => "duplicate",
        }
    }
}

/// Successful handling of one delivery
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    pub event_id: String,
    pub event_type: String,
    pub outcome: ReconcileOutcome,
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    verifier: WebhookVerifier,
    customers: Arc<dyn CustomerStore>,
    users: Arc<dyn UserRegistry>,
    ledger: Arc<dyn DeliveryLedger>,
    reporter: Arc<dyn ErrorReporter>,
}

impl WebhookHandler {
    pub fn new(
        verifier: WebhookVerifier,
        customers: Arc<dyn CustomerStore>,
        users: Arc<dyn UserRegistry>,
        ledger: Arc<dyn DeliveryLedger>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            verifier,
            customers,
            users,
            ledger,
            reporter,
        }
    }

    /// Handler backed by the PostgreSQL store, registry and ledger
    pub fn from_pool(
        pool: PgPool,
        verifier: WebhookVerifier,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self::new(
            verifier,
            Arc::new(PgCustomerStore::new(pool.clone())),
            Arc::new(PgUserRegistry::new(pool.clone())),
            Arc::new(PgDeliveryLedger::new(pool)),
            reporter,
        )
    }

    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    pub fn reporter(&self) -> &dyn ErrorReporter {
        self.reporter.as_ref()
    }

    /// Full pipeline for one delivery: verify, claim, reconcile, record.
    ///
    /// Every failure is reported before it is returned.
    pub async fn receive(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookReceipt, ReportedError> {
        let verified = signature
            .ok_or(AuthError::MissingSignatureHeader)
            .and_then(|signature| self.verifier.verify(payload, signature))
            .map_err(BillingError::from);
        let event = report_err(
            self.reporter.as_ref(),
            FailureStage::Authentication,
            &ReportContext::default(),
            verified,
        )?;

        let context = ReportContext {
            event_id: Some(event.id.clone()),
            event_type: Some(event.event_type.clone()),
        };
        let outcome = report_err(
            self.reporter.as_ref(),
            FailureStage::Reconciliation,
            &context,
            self.handle_event(&event).await,
        )?;

        Ok(WebhookReceipt {
            event_id: event.id,
            event_type: event.event_type,
            outcome,
        })
    }

    /// Handle a verified Stripe event.
    ///
    /// The event id is claimed in the delivery ledger first. A redelivery of
    /// an event that already finished is acknowledged without being applied
    /// twice. A redelivery that arrives while another delivery still holds
    /// the claim fails with [`BillingError::EventInFlight`] so the provider
    /// retries it later. Failed events stay reclaimable for the next delivery.
    pub async fn handle_event(&self, event: &StripeEvent) -> BillingResult<ReconcileOutcome> {
        let action = classify(event)?;

        match self.ledger.claim(event).await? {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::Completed { status } => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    status = %status,
                    "Duplicate webhook event - already handled"
                );
                return Ok(ReconcileOutcome::Duplicate);
            }
            ClaimOutcome::InFlight => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Webhook event is still being processed by another delivery"
                );
                return Err(BillingError::EventInFlight(event.id.clone()));
            }
        }

        tracing::info!(
            event_type = %event.event_type,
            event_id = %event.id,
            "Processing Stripe webhook event (claimed exclusive processing rights)"
        );

        let result = self.apply(action, event).await;

        let (processing_result, error_message) = match &result {
            Ok(ReconcileOutcome::Skipped(_)) => (ProcessingResult::Skipped, None),
            Ok(_) => (ProcessingResult::Success, None),
            Err(e) => (ProcessingResult::Error, Some(e.to_string())),
        };

        if let Err(e) = self
            .ledger
            .record_result(&event.id, processing_result, error_message.as_deref())
            .await
        {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                processing_result = processing_result.as_str(),
                error = %e,
                "Failed to record webhook processing result; event may appear stuck in 'processing'"
            );
        }

        result
    }

    /// Apply one classified action without touching the ledger.
    ///
    /// The projection each action targets is located by
    /// [`ReconciliationAction::lookup_key`].
    pub async fn apply(
        &self,
        action: ReconciliationAction,
        event: &StripeEvent,
    ) -> BillingResult<ReconcileOutcome> {
        use ReconciliationAction::*;

        match (action, action.lookup_key()) {
            (CustomerCreated, _) => self.handle_customer_created(event).await,
            (CustomerDeleted, Some(key)) => self.handle_customer_deleted(event, key).await,
            (SubscriptionCreated, Some(key)) => self.handle_subscription_created(event, key).await,
            (SubscriptionUpdated, Some(key)) => self.handle_subscription_updated(event, key).await,
            (SubscriptionDeleted, Some(key)) => self.handle_subscription_deleted(event, key).await,
            (action, None) => Err(BillingError::WebhookEventNotSupported(format!(
                "{} has no projection lookup key",
                action
            ))),
        }
    }

    // ============ CUSTOMER EVENT HANDLERS ============

    async fn handle_customer_created(&self, event: &StripeEvent) -> BillingResult<ReconcileOutcome> {
        let customer = event.customer()?;
        let customer_id = customer.id.to_string();
        let email = customer
            .email
            .as_deref()
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                BillingError::MalformedPayload(format!("customer {} has no email", customer_id))
            })?;

        if let Some(existing) = self
            .customers
            .find_by(LookupKey::CustomerId, &customer_id)
            .await?
        {
            tracing::info!(
                customer_id = %customer_id,
                projection_id = %existing.id,
                "Customer projection already exists - skipping"
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::AlreadyExists));
        }

        let user_id = self
            .users
            .find_user_id_by_email(email)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(email.to_string()))?;

        let projection = self
            .customers
            .create(NewCustomerProjection {
                user_id,
                stripe_customer_id: customer_id.clone(),
                last_event_at: event.created,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer_id,
            projection_id = %projection.id,
            "Linked Stripe customer to user"
        );

        Ok(ReconcileOutcome::Applied)
    }

    /// Deletion is terminal: it removes the projection whatever its
    /// `last_event_at`, since Stripe never revives a deleted customer.
    async fn handle_customer_deleted(
        &self,
        event: &StripeEvent,
        key: LookupKey,
    ) -> BillingResult<ReconcileOutcome> {
        let customer = event.customer()?;
        let value = key.customer_value(&customer).ok_or_else(|| {
            BillingError::MalformedPayload(format!(
                "customer {} carries no {}",
                customer.id, key
            ))
        })?;
        let existing = self.require_projection(key, &value).await?;

        if !self.customers.delete(existing.id).await? {
            return Err(BillingError::ProjectionNotFound { key, value });
        }

        tracing::warn!(
            user_id = %existing.user_id,
            customer_id = %existing.stripe_customer_id,
            event_created = event.created,
            last_event_at = existing.last_event_at,
            "Stripe customer deleted - removed customer projection"
        );

        Ok(ReconcileOutcome::Applied)
    }

    // ============ SUBSCRIPTION EVENT HANDLERS ============

    async fn handle_subscription_created(
        &self,
        event: &StripeEvent,
        key: LookupKey,
    ) -> BillingResult<ReconcileOutcome> {
        let subscription = event.subscription()?;
        let tier = resolve_tier(Some(&subscription))?;
        let value = key.subscription_value(&subscription);
        let existing = self.require_projection(key, &value).await?;

        if is_stale(&existing, event) {
            return Ok(self.skip_stale(&existing, event));
        }

        let updated = CustomerProjection {
            stripe_subscription_id: Some(subscription.id.to_string()),
            tier,
            last_event_at: event.created,
            ..existing
        };
        if !self.customers.update(&updated).await? {
            return self.lost_write(key, &value, event).await;
        }

        tracing::info!(
            customer_id = %updated.stripe_customer_id,
            subscription_id = %subscription.id,
            tier = tier,
            "Subscription created"
        );

        Ok(ReconcileOutcome::Applied)
    }

    async fn handle_subscription_updated(
        &self,
        event: &StripeEvent,
        key: LookupKey,
    ) -> BillingResult<ReconcileOutcome> {
        let subscription = event.subscription()?;
        let tier = resolve_tier(Some(&subscription))?;
        let value = key.subscription_value(&subscription);
        let existing = self.require_projection(key, &value).await?;

        if is_stale(&existing, event) {
            return Ok(self.skip_stale(&existing, event));
        }

        let previous_tier = existing.tier;
        let updated = CustomerProjection {
            tier,
            last_event_at: event.created,
            ..existing
        };
        if !self.customers.update(&updated).await? {
            return self.lost_write(key, &value, event).await;
        }

        tracing::info!(
            subscription_id = %subscription.id,
            status = ?subscription.status,
            previous_tier = previous_tier,
            tier = tier,
            "Subscription updated"
        );

        Ok(ReconcileOutcome::Applied)
    }

    async fn handle_subscription_deleted(
        &self,
        event: &StripeEvent,
        key: LookupKey,
    ) -> BillingResult<ReconcileOutcome> {
        let subscription = event.subscription()?;
        let value = key.subscription_value(&subscription);
        let existing = self.require_projection(key, &value).await?;

        if is_stale(&existing, event) {
            return Ok(self.skip_stale(&existing, event));
        }

        let updated = CustomerProjection {
            stripe_subscription_id: None,
            tier: FREE_TIER,
            last_event_at: event.created,
            ..existing
        };
        if !self.customers.update(&updated).await? {
            return self.lost_write(key, &value, event).await;
        }

        tracing::info!(
            customer_id = %updated.stripe_customer_id,
            subscription_id = %subscription.id,
            "Subscription deleted - downgraded to free tier"
        );

        Ok(ReconcileOutcome::Applied)
    }

    // ============ HELPERS ============

    async fn require_projection(
        &self,
        key: LookupKey,
        value: &str,
    ) -> BillingResult<CustomerProjection> {
        self.customers
            .find_by(key, value)
            .await?
            .ok_or_else(|| BillingError::ProjectionNotFound {
                key,
                value: value.to_string(),
            })
    }

    fn skip_stale(&self, existing: &CustomerProjection, event: &StripeEvent) -> ReconcileOutcome {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            event_created = event.created,
            last_event_at = existing.last_event_at,
            customer_id = %existing.stripe_customer_id,
            "Ignoring out-of-order event older than the projection"
        );
        ReconcileOutcome::Skipped(SkipReason::StaleEvent)
    }

    /// A conditional write matched no row: either a newer event won the
    /// race or the projection disappeared in between.
    async fn lost_write(
        &self,
        key: LookupKey,
        value: &str,
        event: &StripeEvent,
    ) -> BillingResult<ReconcileOutcome> {
        let current = self.require_projection(key, value).await?;
        Ok(self.skip_stale(&current, event))
    }
}

fn is_stale(existing: &CustomerProjection, event: &StripeEvent) -> bool {
    event.created < existing.last_event_at
}
