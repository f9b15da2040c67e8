//! Stripe webhook signature verification
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>][,v0=...]`.
//! The signed payload is `"<t>.<raw body>"`, keyed with the endpoint secret.
//! Several `v1` entries appear while a secret is being rolled; any match wins.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthError;
use crate::events::StripeEvent;

type HmacSha256 = Hmac<Sha256>;

/// Largest body accepted from the provider.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Default allowed distance between the signed timestamp and local time.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
    max_payload_bytes: usize,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret_len", &self.secret.len())
            .field("tolerance", &self.tolerance)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: DEFAULT_TOLERANCE,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Verify a delivery against the current system clock.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<StripeEvent, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .map_err(|e| {
                tracing::error!("System time error: {}", e);
                AuthError::InvalidSignature
            })?;
        self.verify_at(payload, signature_header, now)
    }

    /// Verify a delivery as of `now` (unix seconds).
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<StripeEvent, AuthError> {
        if payload.len() > self.max_payload_bytes {
            return Err(AuthError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }

        let header = SignatureHeader::parse(signature_header)?;

        let expected = compute_signature(&self.secret, header.timestamp, payload);
        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));
        if !matched {
            tracing::warn!(
                timestamp = header.timestamp,
                candidates = header.v1_signatures.len(),
                "Webhook signature mismatch"
            );
            return Err(AuthError::InvalidSignature);
        }

        let tolerance_secs = self.tolerance.as_secs();
        let diff = now.abs_diff(header.timestamp);
        if diff > tolerance_secs {
            tracing::warn!(
                timestamp = header.timestamp,
                now = now,
                diff = diff,
                "Webhook timestamp outside tolerance"
            );
            return Err(AuthError::StaleTimestamp {
                timestamp: header.timestamp,
                now,
                tolerance_secs,
            });
        }

        StripeEvent::from_bytes(payload)
    }
}

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub v1_signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" if !value.is_empty() => v1_signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::debug!("Missing timestamp in signature header");
            AuthError::InvalidSignature
        })?;

        if v1_signatures.is_empty() {
            tracing::debug!("Missing v1 signature in signature header");
            return Err(AuthError::InvalidSignature);
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

/// Hex HMAC-SHA256 of `"<timestamp>.<payload>"` keyed with `secret`.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Build a complete `Stripe-Signature` header value for `payload`.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!(
        "t={},v1={}",
        timestamp,
        compute_signature(secret, timestamp, payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    fn body() -> Vec<u8> {
        br#"{"id":"evt_1","type":"customer.created","created":1700000000,"data":{"object":{"id":"cus_1","email":"a@b.com"}}}"#.to_vec()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = body();
        let header = signature_header(SECRET, NOW, &payload);
        let event = WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "customer.created");
    }

    #[test]
    fn test_known_signature_vector() {
        // HMAC-SHA256("secret", "1614556800.{}")
        let sig = compute_signature("secret", 1_614_556_800, b"{}");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, compute_signature("secret", 1_614_556_800, b"{}"));
        assert_ne!(sig, compute_signature("secret", 1_614_556_801, b"{}"));
    }

    #[test]
    fn test_every_single_byte_tamper_rejected() {
        let payload = body();
        let header = signature_header(SECRET, NOW, &payload);
        let verifier = WebhookVerifier::new(SECRET);

        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            assert_eq!(
                verifier.verify_at(&tampered, &header, NOW).unwrap_err(),
                AuthError::InvalidSignature,
                "tampering byte {} must invalidate the signature",
                i
            );
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = body();
        let header = signature_header("whsec_other", NOW, &payload);
        let err = WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = body();
        let signed_at = NOW - 301;
        let header = signature_header(SECRET, signed_at, &payload);
        let err = WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .unwrap_err();
        assert!(matches!(err, AuthError::StaleTimestamp { timestamp, .. } if timestamp == signed_at));
    }

    #[test]
    fn test_timestamp_at_tolerance_edge_accepted() {
        let payload = body();
        let header = signature_header(SECRET, NOW - 300, &payload);
        assert!(WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .is_ok());
    }

    #[test]
    fn test_future_timestamp_beyond_tolerance_rejected() {
        let payload = body();
        let header = signature_header(SECRET, NOW + 600, &payload);
        let err = WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .unwrap_err();
        assert!(matches!(err, AuthError::StaleTimestamp { .. }));
    }

    #[test]
    fn test_custom_tolerance() {
        let payload = body();
        let header = signature_header(SECRET, NOW - 20, &payload);
        let err = WebhookVerifier::new(SECRET)
            .with_tolerance(Duration::from_secs(10))
            .verify_at(&payload, &header, NOW)
            .unwrap_err();
        assert!(matches!(err, AuthError::StaleTimestamp { .. }));
    }

    #[test]
    fn test_oversized_payload_rejected_before_signature_check() {
        let payload = vec![b' '; MAX_PAYLOAD_BYTES + 1];
        let err = WebhookVerifier::new(SECRET)
            .verify_at(&payload, "garbage", NOW)
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::PayloadTooLarge {
                size: MAX_PAYLOAD_BYTES + 1,
                limit: MAX_PAYLOAD_BYTES
            }
        );
    }

    #[test]
    fn test_rolled_secret_second_v1_matches() {
        let payload = body();
        let good = compute_signature(SECRET, NOW, &payload);
        let header = format!("t={},v1={},v1={},v0=deadbeef", NOW, "0".repeat(64), good);
        assert!(WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .is_ok());
    }

    #[test]
    fn test_header_missing_parts() {
        assert_eq!(
            SignatureHeader::parse("v1=abc").unwrap_err(),
            AuthError::InvalidSignature
        );
        assert_eq!(
            SignatureHeader::parse("t=123").unwrap_err(),
            AuthError::InvalidSignature
        );
        assert_eq!(
            SignatureHeader::parse("t=abc,v1=abc").unwrap_err(),
            AuthError::InvalidSignature
        );
        assert_eq!(
            SignatureHeader::parse("").unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[test]
    fn test_unbounded_tolerance_accepts_old_timestamp() {
        let payload = body();
        let header = signature_header(SECRET, 0, &payload);
        let verifier = WebhookVerifier::new(SECRET).with_tolerance(Duration::from_secs(u64::MAX));
        assert!(verifier.verify_at(&payload, &header, NOW).is_ok());

        let verifier = WebhookVerifier::new(SECRET)
            .with_tolerance(Duration::from_secs(i64::MAX as u64 + 1));
        assert!(verifier.verify_at(&payload, &header, NOW).is_ok());
    }

    #[test]
    fn test_extreme_timestamp_rejected_without_overflow() {
        let payload = body();
        let header = signature_header(SECRET, i64::MIN, &payload);
        let err = WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .unwrap_err();
        assert!(matches!(err, AuthError::StaleTimestamp { timestamp: i64::MIN, .. }));
    }

    #[test]
    fn test_non_utf8_body_is_authenticated_over_raw_bytes() {
        let payload: Vec<u8> = vec![b'{', 0xff, 0xfe, 0x00, 0x80, b'}'];
        let header = signature_header(SECRET, NOW, &payload);
        let verifier = WebhookVerifier::new(SECRET);

        // signature holds, the envelope does not parse
        let err = verifier.verify_at(&payload, &header, NOW).unwrap_err();
        assert!(matches!(err, AuthError::InvalidPayload(_)), "{err:?}");

        let mut tampered = payload.clone();
        tampered[1] = 0xfd;
        assert_eq!(
            verifier.verify_at(&tampered, &header, NOW).unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[test]
    fn test_signature_covers_raw_bytes() {
        let payload: &[u8] = &[0xc3, 0x28, 0xa0, 0xa1];
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{NOW}.").as_bytes());
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(compute_signature(SECRET, NOW, payload), expected);
    }

    #[test]
    fn test_valid_signature_over_invalid_json() {
        let payload = b"not json".to_vec();
        let header = signature_header(SECRET, NOW, &payload);
        let err = WebhookVerifier::new(SECRET)
            .verify_at(&payload, &header, NOW)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidPayload(_)));
    }
}
