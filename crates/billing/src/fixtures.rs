//! Stripe payload fixtures
//!
//! Objects are shaped like real webhook deliveries so they decode into the
//! `stripe` resource types. Used by the billing and API test suites.

use serde_json::{json, Value};

const FIXTURE_CREATED: i64 = 1_700_000_000;

/// A `customer` object.
pub fn customer_object(id: &str, email: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "customer",
        "address": null,
        "balance": 0,
        "created": FIXTURE_CREATED,
        "currency": null,
        "default_source": null,
        "delinquent": false,
        "description": null,
        "discount": null,
        "email": email,
        "invoice_prefix": "4F2B9C1D",
        "invoice_settings": {
            "custom_fields": null,
            "default_payment_method": null,
            "footer": null,
            "rendering_options": null
        },
        "livemode": false,
        "metadata": {},
        "name": null,
        "next_invoice_sequence": 1,
        "phone": null,
        "preferred_locales": [],
        "shipping": null,
        "tax_exempt": "none",
        "test_clock": null
    })
}

/// A recurring `price` object, with `metadata.tier` set when given.
pub fn price_object(id: &str, tier: Option<&str>) -> Value {
    let metadata = match tier {
        Some(tier) => json!({ "tier": tier }),
        None => json!({}),
    };
    json!({
        "id": id,
        "object": "price",
        "active": true,
        "billing_scheme": "per_unit",
        "created": FIXTURE_CREATED,
        "currency": "usd",
        "custom_unit_amount": null,
        "livemode": false,
        "lookup_key": null,
        "metadata": metadata,
        "nickname": null,
        "product": "prod_tiersync",
        "recurring": {
            "aggregate_usage": null,
            "interval": "month",
            "interval_count": 1,
            "meter": null,
            "trial_period_days": null,
            "usage_type": "licensed"
        },
        "tax_behavior": "unspecified",
        "tiers_mode": null,
        "transform_quantity": null,
        "type": "recurring",
        "unit_amount": 2000,
        "unit_amount_decimal": "2000"
    })
}

/// A `subscription_item` object on `subscription`.
pub fn subscription_item(id: &str, subscription: &str, price: Value) -> Value {
    let plan = json!({
        "id": price["id"],
        "object": "plan",
        "active": true,
        "aggregate_usage": null,
        "amount": 2000,
        "amount_decimal": "2000",
        "billing_scheme": "per_unit",
        "created": FIXTURE_CREATED,
        "currency": "usd",
        "interval": "month",
        "interval_count": 1,
        "livemode": false,
        "metadata": price["metadata"],
        "meter": null,
        "nickname": null,
        "product": "prod_tiersync",
        "tiers_mode": null,
        "transform_usage": null,
        "trial_period_days": null,
        "usage_type": "licensed"
    });
    json!({
        "id": id,
        "object": "subscription_item",
        "billing_thresholds": null,
        "created": FIXTURE_CREATED,
        "discounts": [],
        "metadata": {},
        "plan": plan,
        "price": price,
        "quantity": 1,
        "subscription": subscription,
        "tax_rates": []
    })
}

/// A `subscription` object for `customer` with the given line items.
///
/// `customer` may be a bare id string or an expanded customer object.
pub fn subscription_with_items(id: &str, customer: Value, items: Vec<Value>) -> Value {
    let total_count = items.len();
    json!({
        "id": id,
        "object": "subscription",
        "application": null,
        "application_fee_percent": null,
        "automatic_tax": { "enabled": false, "liability": null },
        "billing_cycle_anchor": FIXTURE_CREATED,
        "billing_cycle_anchor_config": null,
        "billing_thresholds": null,
        "cancel_at": null,
        "cancel_at_period_end": false,
        "canceled_at": null,
        "cancellation_details": { "comment": null, "feedback": null, "reason": null },
        "collection_method": "charge_automatically",
        "created": FIXTURE_CREATED,
        "currency": "usd",
        "current_period_end": FIXTURE_CREATED + 2_592_000,
        "current_period_start": FIXTURE_CREATED,
        "customer": customer,
        "days_until_due": null,
        "default_payment_method": null,
        "default_source": null,
        "default_tax_rates": [],
        "description": null,
        "discount": null,
        "discounts": [],
        "ended_at": null,
        "invoice_settings": { "account_tax_ids": null, "issuer": { "type": "self" } },
        "items": {
            "object": "list",
            "data": items,
            "has_more": false,
            "total_count": total_count,
            "url": format!("/v1/subscription_items?subscription={id}")
        },
        "latest_invoice": null,
        "livemode": false,
        "metadata": {},
        "next_pending_invoice_item_invoice": null,
        "on_behalf_of": null,
        "pause_collection": null,
        "payment_settings": {
            "payment_method_options": null,
            "payment_method_types": null,
            "save_default_payment_method": "off"
        },
        "pending_invoice_item_interval": null,
        "pending_setup_intent": null,
        "pending_update": null,
        "schedule": null,
        "start_date": FIXTURE_CREATED,
        "status": "active",
        "test_clock": null,
        "transfer_data": null,
        "trial_end": null,
        "trial_settings": { "end_behavior": { "missing_payment_method": "create_invoice" } },
        "trial_start": null
    })
}

/// A single-item `subscription` for `customer`. The item's price carries
/// `metadata.tier` when `tier` is given.
pub fn subscription_object(id: &str, customer: &str, tier: Option<&str>) -> Value {
    let item = subscription_item(
        &format!("si_{}", id.trim_start_matches("sub_")),
        id,
        price_object("price_tiersync", tier),
    );
    subscription_with_items(id, Value::from(customer), vec![item])
}

/// An `event` envelope around `object`.
pub fn event_envelope(id: &str, event_type: &str, created: i64, object: Value) -> Value {
    json!({
        "id": id,
        "object": "event",
        "api_version": "2023-10-16",
        "created": created,
        "livemode": false,
        "pending_webhooks": 1,
        "request": { "id": null, "idempotency_key": null },
        "type": event_type,
        "data": { "object": object }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_decode_as_stripe_types() {
        let customer: stripe::Customer =
            serde_json::from_value(customer_object("cus_1", Some("a@b.com"))).unwrap();
        assert_eq!(customer.id.as_str(), "cus_1");
        assert_eq!(customer.email.as_deref(), Some("a@b.com"));

        let subscription: stripe::Subscription =
            serde_json::from_value(subscription_object("sub_1", "cus_1", Some("2"))).unwrap();
        assert_eq!(subscription.id.as_str(), "sub_1");
        assert_eq!(subscription.items.data.len(), 1);
        assert_eq!(subscription.status, stripe::SubscriptionStatus::Active);
    }
}
