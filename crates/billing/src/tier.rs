//! Subscription tier resolution
//!
//! The tier is configured on the Stripe price as `metadata.tier`. A missing or
//! unparsable value is a billing configuration error and is never defaulted.

use std::collections::HashMap;

use stripe::Subscription;

use crate::error::{BillingError, BillingResult};

/// Price metadata key holding the tier level
pub const TIER_METADATA_KEY: &str = "tier";

/// Tier of a customer without a subscription
pub const FREE_TIER: i32 = 0;

/// Resolve the tier from the first line item's price metadata.
pub fn resolve_tier(subscription: Option<&Subscription>) -> BillingResult<i32> {
    let Some(subscription) = subscription else {
        return Ok(FREE_TIER);
    };

    let price = subscription
        .items
        .data
        .first()
        .ok_or_else(|| {
            BillingError::InvalidTierMetadata(format!(
                "subscription {} has no line items",
                subscription.id
            ))
        })?
        .price
        .as_ref()
        .ok_or_else(|| {
            BillingError::InvalidTierMetadata(format!(
                "first line item of subscription {} has no price",
                subscription.id
            ))
        })?;

    let metadata: Option<&HashMap<String, String>> = (&price.metadata).into();
    let raw = metadata
        .and_then(|m| m.get(TIER_METADATA_KEY))
        .map(String::as_str)
        .unwrap_or_default();
    if raw.is_empty() {
        return Err(BillingError::InvalidTierMetadata(format!(
            "price {} on subscription {} has no `{}` metadata",
            price.id, subscription.id, TIER_METADATA_KEY
        )));
    }

    let tier: i32 = raw.parse().map_err(|_| {
        BillingError::InvalidTierMetadata(format!(
            "price {} has non-integer tier {:?}",
            price.id, raw
        ))
    })?;

    if tier < FREE_TIER {
        return Err(BillingError::InvalidTierMetadata(format!(
            "price {} has negative tier {}",
            price.id, tier
        )));
    }

    Ok(tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{
        price_object, subscription_item, subscription_object, subscription_with_items,
    };
    use serde_json::Value;

    fn subscription_with_tier(tier: Option<&str>) -> Subscription {
        serde_json::from_value(subscription_object("sub_1", "cus_1", tier)).unwrap()
    }

    fn subscription_with_prices(prices: Vec<Value>) -> Subscription {
        let items = prices
            .into_iter()
            .enumerate()
            .map(|(i, price)| subscription_item(&format!("si_{i}"), "sub_1", price))
            .collect();
        serde_json::from_value(subscription_with_items("sub_1", Value::from("cus_1"), items))
            .unwrap()
    }

    #[test]
    fn test_absent_subscription_is_free() {
        assert_eq!(resolve_tier(None).unwrap(), 0);
    }

    #[test]
    fn test_numeric_tier() {
        assert_eq!(resolve_tier(Some(&subscription_with_tier(Some("2")))).unwrap(), 2);
        assert_eq!(resolve_tier(Some(&subscription_with_tier(Some("0")))).unwrap(), 0);
    }

    #[test]
    fn test_non_integer_tier_rejected() {
        for bad in ["abc", "2.5", " 2", "", "99999999999"] {
            let err = resolve_tier(Some(&subscription_with_tier(Some(bad)))).unwrap_err();
            assert!(
                matches!(err, BillingError::InvalidTierMetadata(_)),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_negative_tier_rejected() {
        let err = resolve_tier(Some(&subscription_with_tier(Some("-1")))).unwrap_err();
        assert!(matches!(err, BillingError::InvalidTierMetadata(_)));
    }

    #[test]
    fn test_missing_tier_key_rejected() {
        let err = resolve_tier(Some(&subscription_with_tier(None))).unwrap_err();
        assert!(matches!(err, BillingError::InvalidTierMetadata(_)));
    }

    #[test]
    fn test_no_line_items_rejected() {
        let err = resolve_tier(Some(&subscription_with_prices(vec![]))).unwrap_err();
        assert!(matches!(err, BillingError::InvalidTierMetadata(_)));
    }

    #[test]
    fn test_only_first_item_is_consulted() {
        let sub = subscription_with_prices(vec![
            price_object("price_base", Some("3")),
            price_object("price_addon", Some("9")),
        ]);
        assert_eq!(resolve_tier(Some(&sub)).unwrap(), 3);
    }
}
