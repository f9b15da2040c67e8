//! Error reporting for webhook failures
//!
//! Every handled failure is reported exactly once and gets a correlation id,
//! which the HTTP layer echoes back so a provider-side delivery log can be
//! matched to local diagnostics.

use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Where in the pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Reading the request body
    Intake,
    /// Signature and envelope checks
    Authentication,
    /// Classification and projection
    Reconciliation,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Intake => "intake",
            FailureStage::Authentication => "authentication",
            FailureStage::Reconciliation => "reconciliation",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
}

/// Capability for reporting handled failures out of band.
pub trait ErrorReporter: Send + Sync {
    /// Report `error` and return the correlation id assigned to it.
    fn report(&self, error: &BillingError, stage: FailureStage, context: &ReportContext) -> Uuid;
}

/// Reports failures as structured `tracing` events.
///
/// In production only the error code and message are logged; otherwise the
/// debug representation of the error is attached too.
#[derive(Debug, Clone)]
pub struct TracingReporter {
    production: bool,
}

impl TracingReporter {
    pub fn new(production: bool) -> Self {
        Self { production }
    }
}

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &BillingError, stage: FailureStage, context: &ReportContext) -> Uuid {
        let correlation_id = Uuid::new_v4();
        let event_id = context.event_id.as_deref().unwrap_or("-");
        let event_type = context.event_type.as_deref().unwrap_or("-");

        match (stage, self.production) {
            (FailureStage::Reconciliation, true) => tracing::error!(
                %correlation_id,
                stage = stage.as_str(),
                code = error.code(),
                event_id,
                event_type,
                "Webhook reconciliation failed: {}",
                error
            ),
            (FailureStage::Reconciliation, false) => tracing::error!(
                %correlation_id,
                stage = stage.as_str(),
                code = error.code(),
                event_id,
                event_type,
                detail = ?error,
                "Webhook reconciliation failed: {}",
                error
            ),
            (_, true) => tracing::warn!(
                %correlation_id,
                stage = stage.as_str(),
                code = error.code(),
                "Webhook rejected: {}",
                error
            ),
            (_, false) => tracing::warn!(
                %correlation_id,
                stage = stage.as_str(),
                code = error.code(),
                detail = ?error,
                "Webhook rejected: {}",
                error
            ),
        }

        correlation_id
    }
}

/// A report kept by [`CapturingReporter`]
#[derive(Debug, Clone)]
pub struct CapturedReport {
    pub correlation_id: Uuid,
    pub code: &'static str,
    pub message: String,
    pub stage: FailureStage,
    pub context: ReportContext,
}

/// Keeps every report in memory; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct CapturingReporter {
    reports: Mutex<Vec<CapturedReport>>,
}

impl CapturingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<CapturedReport> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ErrorReporter for CapturingReporter {
    fn report(&self, error: &BillingError, stage: FailureStage, context: &ReportContext) -> Uuid {
        let correlation_id = Uuid::new_v4();
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(CapturedReport {
                correlation_id,
                code: error.code(),
                message: error.to_string(),
                stage,
                context: context.clone(),
            });
        correlation_id
    }
}

/// A failure that has already been reported.
#[derive(Debug)]
pub struct ReportedError {
    pub correlation_id: Uuid,
    pub stage: FailureStage,
    pub error: BillingError,
}

impl std::fmt::Display for ReportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (correlation id {})", self.error, self.correlation_id)
    }
}

impl std::error::Error for ReportedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Report the error of `result`, if any, and attach its correlation id.
pub fn report_err<T>(
    reporter: &dyn ErrorReporter,
    stage: FailureStage,
    context: &ReportContext,
    result: BillingResult<T>,
) -> Result<T, ReportedError> {
    result.map_err(|error| ReportedError {
        correlation_id: reporter.report(&error, stage, context),
        stage,
        error,
    })
}
