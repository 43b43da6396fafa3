//! Payment provider webhook authentication and event decoding.
//!
//! The provider signs each delivery with
//! `Stripe-Signature: t=<unix seconds>,v1=<hex hmac>[,v1=...]`, where the
//! HMAC-SHA256 is computed over `"<t>.<raw body>"` with the endpoint secret.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::error::{Result, SagaError};

type HmacSha256 = Hmac<Sha256>;

/// Deliveries older (or further in the future) than this are rejected.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Why a webhook signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("timestamp outside the tolerance window")]
    Expired,

    #[error("no signature matches the payload")]
    Mismatch,

    #[error("webhook secret cannot key the HMAC")]
    InvalidKey,
}

/// Verifies a signature header against the raw request body.
///
/// Any one matching `v1` entry is enough; entries that are not valid hex
/// are skipped.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> std::result::Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        let mut mac = signed_mac(secret, timestamp)?;
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

/// Builds a signature header for `payload`, as the provider would.
pub fn sign_payload(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> std::result::Result<String, SignatureError> {
    let mut mac = signed_mac(secret, timestamp)?;
    mac.update(payload);
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// MAC primed with the `"<t>."` prefix of the signed string.
fn signed_mac(secret: &str, timestamp: i64) -> std::result::Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    Ok(mac)
}

/// The event types the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCanceled,
    /// Acknowledged and ignored.
    Other(String),
}

impl WebhookEventKind {
    fn from_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => Self::PaymentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            "payment_intent.canceled" => Self::PaymentCanceled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PaymentSucceeded => "payment_intent.succeeded",
            Self::PaymentFailed => "payment_intent.payment_failed",
            Self::PaymentCanceled => "payment_intent.canceled",
            Self::Other(other) => other,
        }
    }
}

/// A decoded provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub kind: WebhookEventKind,
    /// The payment intent the event refers to.
    pub intent_id: String,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: RawEventObject,
}

#[derive(Deserialize)]
struct RawEventObject {
    id: String,
}

/// Decodes an already verified payload.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| SagaError::InvalidRequest(format!("malformed webhook event: {e}")))?;
    Ok(WebhookEvent {
        id: raw.id,
        kind: WebhookEventKind::from_type(&raw.event_type),
        intent_id: raw.data.object.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_700_000_000;

    fn payload() -> Vec<u8> {
        br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_123"}}}"#
            .to_vec()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let header = sign_payload(&payload(), SECRET, NOW).unwrap();
        assert_eq!(verify_signature(&payload(), &header, SECRET, NOW), Ok(()));
        assert_eq!(
            verify_signature(&payload(), &header, SECRET, NOW + 299),
            Ok(())
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign_payload(&payload(), "wrong_secret", NOW).unwrap();
        assert_eq!(
            verify_signature(&payload(), &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_modified_payload_rejected() {
        let header = sign_payload(&payload(), SECRET, NOW).unwrap();
        let tampered = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_999"}}}"#;
        assert_eq!(
            verify_signature(tampered, &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_old_timestamp_rejected() {
        let header = sign_payload(&payload(), SECRET, NOW - 600).unwrap();
        assert_eq!(
            verify_signature(&payload(), &header, SECRET, NOW),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_malformed_headers_rejected() {
        assert_eq!(
            verify_signature(&payload(), "v1=abcdef", SECRET, NOW),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_signature(&payload(), "t=1700000000", SECRET, NOW),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            verify_signature(&payload(), "garbage", SECRET, NOW),
            Err(SignatureError::MissingTimestamp)
        );
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let valid = sign_payload(&payload(), SECRET, NOW).unwrap();
        let signature = valid.split_once("v1=").map(|(_, s)| s).unwrap();
        let header = format!("t={NOW},v1=not-hex,v1=00ff,v1={signature}");
        assert_eq!(verify_signature(&payload(), &header, SECRET, NOW), Ok(()));
    }

    #[test]
    fn test_parse_event() {
        let event = parse_event(&payload()).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.kind, WebhookEventKind::PaymentSucceeded);
        assert_eq!(event.intent_id, "pi_123");

        let other = parse_event(
            br#"{"id":"evt_2","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#,
        )
        .unwrap();
        assert_eq!(other.kind, WebhookEventKind::Other("charge.refunded".to_string()));

        assert!(matches!(
            parse_event(b"not json"),
            Err(SagaError::InvalidRequest(_))
        ));
    }
}
