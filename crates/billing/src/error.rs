//! Billing error types

use thiserror::Error;

use crate::events::LookupKey;

pub type BillingResult<T> = Result<T, BillingError>;

/// Failures raised while authenticating an inbound webhook delivery.
///
/// All of these are answered before any state is read or written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("payload of {size} bytes exceeds the {limit} byte ceiling")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("request body could not be read: {0}")]
    BodyUnreadable(String),

    #[error("missing Stripe-Signature header")]
    MissingSignatureHeader,

    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("webhook timestamp {timestamp} is outside the {tolerance_secs}s tolerance (now {now})")]
    StaleTimestamp {
        timestamp: i64,
        now: i64,
        tolerance_secs: u64,
    },

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("unhandled stripe event type: {0}")]
    WebhookEventNotSupported(String),

    #[error("malformed event payload: {0}")]
    MalformedPayload(String),

    #[error("no user registered with email {0}")]
    UserNotFound(String),

    #[error("no customer projection with {key} = {value}")]
    ProjectionNotFound { key: LookupKey, value: String },

    #[error("invalid tier metadata: {0}")]
    InvalidTierMetadata(String),

    #[error("conflicting customer projection: {0}")]
    Conflict(String),

    /// Another delivery of the same event holds the claim and has not finished
    #[error("event {0} is still being processed by another delivery")]
    EventInFlight(String),

    #[error("database error: {0}")]
    Database(String),
}

impl BillingError {
    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Auth(AuthError::PayloadTooLarge { .. }) => "payload_too_large",
            BillingError::Auth(AuthError::BodyUnreadable(_)) => "body_unreadable",
            BillingError::Auth(AuthError::MissingSignatureHeader) => "missing_signature",
            BillingError::Auth(AuthError::InvalidSignature) => "invalid_signature",
            BillingError::Auth(AuthError::StaleTimestamp { .. }) => "stale_timestamp",
            BillingError::Auth(AuthError::InvalidPayload(_)) => "invalid_payload",
            BillingError::WebhookEventNotSupported(_) => "unsupported_event",
            BillingError::MalformedPayload(_) => "malformed_payload",
            BillingError::UserNotFound(_) => "user_not_found",
            BillingError::ProjectionNotFound { .. } => "projection_not_found",
            BillingError::InvalidTierMetadata(_) => "invalid_tier_metadata",
            BillingError::Conflict(_) => "conflict",
            BillingError::EventInFlight(_) => "event_in_flight",
            BillingError::Database(_) => "database_error",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.is_unique_violation() {
                return BillingError::Conflict(
                    db.constraint()
                        .map(|c| format!("unique constraint {} violated", c))
                        .unwrap_or_else(|| db.message().to_string()),
                );
            }
        }
        BillingError::Database(e.to_string())
    }
}
