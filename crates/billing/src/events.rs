//! Stripe event envelope, typed payloads and event classification
//!
//! The envelope is decoded by hand so that event types and API versions the
//! Stripe client crate does not know still classify. `data.object` is decoded
//! into the `stripe` resource types once the action is known.

use std::fmt;

use serde::{Deserialize, Serialize};
use stripe::{Customer, Subscription};

use crate::error::{AuthError, BillingError, BillingResult};

/// A webhook event whose signature has been verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    /// Provider event id (evt_...)
    pub id: String,
    /// Provider event type discriminator, e.g. `customer.created`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event creation time (unix seconds)
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: EventData,
}

/// Untyped event body, decoded on demand once the event is classified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

impl StripeEvent {
    /// Parse the envelope from a raw request body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthError> {
        serde_json::from_slice(bytes).map_err(|e| AuthError::InvalidPayload(e.to_string()))
    }

    /// Decode `data.object` as a customer
    pub fn customer(&self) -> BillingResult<Customer> {
        self.decode_object("customer")
    }

    /// Decode `data.object` as a subscription
    pub fn subscription(&self) -> BillingResult<Subscription> {
        self.decode_object("subscription")
    }

    fn decode_object<T: serde::de::DeserializeOwned>(&self, expected: &str) -> BillingResult<T> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            BillingError::MalformedPayload(format!(
                "event {} ({}) does not carry a {}: {}",
                self.id, self.event_type, expected, e
            ))
        })
    }
}

// =============================================================================
// Classification
// =============================================================================

/// The local state transition for one classified provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconciliationAction {
    CustomerCreated,
    CustomerDeleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
}

/// Field used to find the projection an action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupKey {
    CustomerId,
    SubscriptionId,
}

impl LookupKey {
    /// Column backing this key in the `customers` table
    pub fn column(&self) -> &'static str {
        match self {
            LookupKey::CustomerId => "stripe_customer_id",
            LookupKey::SubscriptionId => "stripe_subscription_id",
        }
    }
}

impl LookupKey {
    /// Value of this key carried by a subscription payload
    pub fn subscription_value(&self, subscription: &Subscription) -> String {
        match self {
            LookupKey::CustomerId => subscription_customer_id(subscription),
            LookupKey::SubscriptionId => subscription.id.to_string(),
        }
    }

    /// Value of this key carried by a customer payload. A customer object
    /// names no subscription.
    pub fn customer_value(&self, customer: &Customer) -> Option<String> {
        match self {
            LookupKey::CustomerId => Some(customer.id.to_string()),
            LookupKey::SubscriptionId => None,
        }
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl ReconciliationAction {
    pub const ALL: [ReconciliationAction; 5] = [
        ReconciliationAction::CustomerCreated,
        ReconciliationAction::CustomerDeleted,
        ReconciliationAction::SubscriptionCreated,
        ReconciliationAction::SubscriptionUpdated,
        ReconciliationAction::SubscriptionDeleted,
    ];

    /// Map a provider event type string to an action.
    pub fn from_event_type(event_type: &str) -> BillingResult<Self> {
        match event_type {
            "customer.created" => Ok(Self::CustomerCreated),
            "customer.deleted" => Ok(Self::CustomerDeleted),
            "customer.subscription.created" => Ok(Self::SubscriptionCreated),
            "customer.subscription.updated" => Ok(Self::SubscriptionUpdated),
            "customer.subscription.deleted" => Ok(Self::SubscriptionDeleted),
            other => Err(BillingError::WebhookEventNotSupported(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerCreated => "customer.created",
            Self::CustomerDeleted => "customer.deleted",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
        }
    }

    /// Key used to locate the existing projection.
    ///
    /// `customer.subscription.updated` does not reliably carry the parent
    /// customer id, so it is matched on the subscription id. Every other
    /// action that touches an existing row is matched on the customer id.
    /// `customer.created` has no existing row; its owner is found by email.
    pub fn lookup_key(&self) -> Option<LookupKey> {
        match self {
            Self::CustomerCreated => None,
            Self::CustomerDeleted => Some(LookupKey::CustomerId),
            Self::SubscriptionCreated => Some(LookupKey::CustomerId),
            Self::SubscriptionUpdated => Some(LookupKey::SubscriptionId),
            Self::SubscriptionDeleted => Some(LookupKey::CustomerId),
        }
    }
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a verified event. Pure; performs no I/O.
pub fn classify(event: &StripeEvent) -> BillingResult<ReconciliationAction> {
    ReconciliationAction::from_event_type(&event.event_type)
}

// =============================================================================
// Payload helpers
// =============================================================================

/// Customer id a subscription belongs to, whether or not it was expanded.
pub fn subscription_customer_id(subscription: &Subscription) -> String {
    match &subscription.customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(customer) => customer.id.to_string(),
    }
}
