//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tiersync_billing::{AuthError, BillingError, ReportedError};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A webhook failure that has already been reported
    #[error(transparent)]
    Webhook(#[from] ReportedError),
    #[error("Not found")]
    NotFound,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Webhook(reported) => webhook_status(&reported.error),
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

fn webhook_status(error: &BillingError) -> StatusCode {
    match error {
        BillingError::Auth(AuthError::PayloadTooLarge { .. } | AuthError::BodyUnreadable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        BillingError::Auth(_) => StatusCode::BAD_REQUEST,
        // Non-2xx so Stripe redelivers once the live claim settles
        BillingError::Conflict(_) | BillingError::EventInFlight(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            ApiError::Webhook(reported) => {
                // Storage errors can carry connection details
                let message = match reported.error {
                    BillingError::Database(_) => "Internal server error".to_string(),
                    ref error => error.to_string(),
                };
                json!({
                    "error": message,
                    "code": reported.error.code(),
                    "correlation_id": reported.correlation_id,
                })
            }
            ApiError::NotFound => json!({
                "error": self.to_string(),
                "code": "not_found",
            }),
        };

        (status, Json(body)).into_response()
    }
}
