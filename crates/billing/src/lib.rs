#![recursion_limit = "256"]
// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries owned payload details
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! TierSync Billing Module
//!
//! Keeps local customer projections in sync with Stripe.
//!
//! ## Features
//!
//! - **Webhook Authentication**: HMAC-SHA256 signature and timestamp checks
//! - **Event Classification**: Maps Stripe event types to reconciliation actions
//! - **Entity Projection**: Creates, updates and deletes customer projections
//! - **Tier Resolution**: Derives the access tier from price metadata
//! - **Delivery Ledger**: Event-id deduplication across redeliveries
//! - **Error Reporting**: Correlation ids for every handled failure

pub mod customers;
pub mod error;
pub mod events;
pub mod fixtures;
pub mod ledger;
pub mod memory;
pub mod signature;
pub mod telemetry;
pub mod tier;
pub mod webhooks;


// Customers
pub use customers::{
    CustomerProjection, CustomerStore, NewCustomerProjection, PgCustomerStore, PgUserRegistry,
    UserRegistry,
};

// Error
pub use error::{AuthError, BillingError, BillingResult};

// Events
pub use events::{
    classify, subscription_customer_id, LookupKey, ReconciliationAction, StripeEvent,
};

// Ledger
pub use ledger::{ClaimOutcome, DeliveryLedger, PgDeliveryLedger, ProcessingResult};

// In-memory collaborators
pub use memory::{InMemoryCustomerStore, InMemoryDeliveryLedger, InMemoryUserRegistry};

// Signature
pub use signature::{WebhookVerifier, DEFAULT_TOLERANCE, MAX_PAYLOAD_BYTES};

// Telemetry
pub use telemetry::{
    report_err, CapturingReporter, ErrorReporter, FailureStage, ReportContext, ReportedError,
    TracingReporter,
};

// Tier
pub use tier::{resolve_tier, FREE_TIER};

// Webhooks
pub use webhooks::{ReconcileOutcome, SkipReason, WebhookHandler, WebhookReceipt};
