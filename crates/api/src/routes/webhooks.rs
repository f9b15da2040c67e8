//! Stripe webhook endpoint
//!
//! POST /webhooks/stripe receives the raw body so the signature can be
//! checked against the exact bytes Stripe signed.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use serde::Serialize;
use tiersync_billing::{
    report_err, AuthError, BillingError, FailureStage, ReconcileOutcome, ReportContext,
};

use crate::{error::ApiResult, state::AppState};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Acknowledgement returned to Stripe for a handled delivery
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    pub event_type: String,
    pub outcome: &'static str,
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<WebhookAck>> {
    let limit = state.webhooks.verifier().max_payload_bytes();

    let payload = report_err(
        state.webhooks.reporter(),
        FailureStage::Intake,
        &ReportContext::default(),
        read_body(&headers, body, limit).await,
    )?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let receipt = state.webhooks.receive(&payload, signature).await?;

    if receipt.outcome == ReconcileOutcome::Duplicate {
        tracing::debug!(event_id = %receipt.event_id, "Acknowledging redelivered event");
    }

    Ok(Json(WebhookAck {
        received: true,
        event_id: receipt.event_id,
        event_type: receipt.event_type,
        outcome: receipt.outcome.as_str(),
    }))
}

/// Read at most `limit` bytes of the request body.
async fn read_body(
    headers: &HeaderMap,
    body: Body,
    limit: usize,
) -> Result<axum::body::Bytes, BillingError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if let Some(size) = declared.filter(|size| *size > limit) {
        return Err(AuthError::PayloadTooLarge { size, limit }.into());
    }

    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| AuthError::BodyUnreadable(e.to_string()).into())
}
