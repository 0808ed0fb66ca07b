//! Webhook signature verification.
//!
//! Two schemes are supported:
//!
//! - **Payment processor** (`Stripe-Signature`): `t=<unix>,v1=<hex>[,v1=<hex>...]`,
//!   HMAC-SHA256 over `"{t}.{body}"` keyed with the raw secret.
//! - **Identity provider** (`svix-id`, `svix-timestamp`, `svix-signature`):
//!   HMAC-SHA256 over `"{id}.{timestamp}.{body}"` keyed with the base64 part of a
//!   `whsec_` secret; the signature header holds space-separated `v1,<base64>`
//!   entries.
//!
//! Both reject timestamps outside the configured tolerance. Verification has
//! no side effects.

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::crypto::{constant_time_eq, hmac_sha256_base64, hmac_sha256_hex};

/// Payment processor signature header.
pub const PROCESSOR_SIGNATURE_HEADER: &str = "stripe-signature";

/// Identity-provider message id header.
pub const IDENTITY_ID_HEADER: &str = "svix-id";

/// Identity-provider timestamp header.
pub const IDENTITY_TIMESTAMP_HEADER: &str = "svix-timestamp";

/// Identity-provider signature header.
pub const IDENTITY_SIGNATURE_HEADER: &str = "svix-signature";

const IDENTITY_SECRET_PREFIX: &str = "whsec_";

/// Signature verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No signing secret is configured.
    #[error("webhook signing secret not configured")]
    NotConfigured,

    /// The configured secret cannot be decoded.
    #[error("webhook signing secret is malformed")]
    InvalidSecret,

    /// A required header is absent.
    #[error("missing signature header: {0}")]
    MissingHeader(&'static str),

    /// A header is present but unparseable.
    #[error("malformed signature header")]
    Malformed,

    /// The signed timestamp is outside the tolerance window.
    #[error("signature timestamp outside tolerance")]
    Stale,

    /// No signature matched the payload.
    #[error("signature mismatch")]
    Mismatch,
}

impl SignatureError {
    /// Whether the failure is on our side (retry helps once fixed) rather
    /// than a bad request.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured | Self::InvalidSecret)
    }
}

fn check_timestamp(timestamp: i64, now: i64, tolerance_secs: i64) -> Result<(), SignatureError> {
    if (now - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }
    Ok(())
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .ok_or(SignatureError::MissingHeader(name))?
        .to_str()
        .map_err(|_| SignatureError::Malformed)
}

// ============================================================================
// Payment processor
// ============================================================================

/// Verify a payment processor webhook.
///
/// # Errors
///
/// `NotConfigured` when `secret` is `None`; otherwise any header, timestamp
/// or signature failure.
pub fn verify_processor(
    secret: Option<&str>,
    headers: &HeaderMap,
    payload: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let secret = secret.ok_or(SignatureError::NotConfigured)?;
    let signature = header(headers, PROCESSOR_SIGNATURE_HEADER)?;

    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            // Other schemes (v0) are ignored for forward compatibility.
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let timestamp_secs: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    check_timestamp(timestamp_secs, now, tolerance_secs)?;

    let expected = hmac_sha256_hex(secret.as_bytes(), &[timestamp.as_bytes(), b".", payload]);

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a processor signature header value for `payload`.
#[must_use]
pub fn sign_processor(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let ts = timestamp.to_string();
    let sig = hmac_sha256_hex(secret.as_bytes(), &[ts.as_bytes(), b".", payload]);
    format!("t={ts},v1={sig}")
}

// ============================================================================
// Identity provider
// ============================================================================

fn identity_key(secret: &str) -> Result<Vec<u8>, SignatureError> {
    let encoded = secret.strip_prefix(IDENTITY_SECRET_PREFIX).unwrap_or(secret);
    BASE64_STANDARD
        .decode(encoded)
        .map_err(|_| SignatureError::InvalidSecret)
}

/// Verify an identity-provider webhook.
///
/// The id, timestamp and signature headers are validated as a set.
///
/// # Errors
///
/// `NotConfigured`/`InvalidSecret` for secret problems; otherwise any
/// header, timestamp or signature failure.
pub fn verify_identity(
    secret: Option<&str>,
    headers: &HeaderMap,
    payload: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let key = identity_key(secret.ok_or(SignatureError::NotConfigured)?)?;

    let id = header(headers, IDENTITY_ID_HEADER)?;
    let timestamp = header(headers, IDENTITY_TIMESTAMP_HEADER)?;
    let signature = header(headers, IDENTITY_SIGNATURE_HEADER)?;

    let timestamp_secs: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    check_timestamp(timestamp_secs, now, tolerance_secs)?;

    let expected = hmac_sha256_base64(
        &key,
        &[id.as_bytes(), b".", timestamp.as_bytes(), b".", payload],
    );

    let matched = signature
        .split_whitespace()
        .filter_map(|entry| entry.split_once(','))
        .filter(|(version, _)| *version == "v1")
        .any(|(_, sig)| constant_time_eq(&expected, sig));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build an identity-provider signature header value for `payload`.
///
/// # Errors
///
/// Returns `InvalidSecret` when the secret is not valid base64.
pub fn sign_identity(
    secret: &str,
    id: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, SignatureError> {
    let key = identity_key(secret)?;
    let ts = timestamp.to_string();
    let sig = hmac_sha256_base64(&key, &[id.as_bytes(), b".", ts.as_bytes(), b".", payload]);
    Ok(format!("v1,{sig}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_processor_test";
    // base64("identity-secret-key")
    const IDENTITY_SECRET: &str = "whsec_aWRlbnRpdHktc2VjcmV0LWtleQ==";
    const NOW: i64 = 1_700_000_000;

    fn processor_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            PROCESSOR_SIGNATURE_HEADER,
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    fn identity_headers(id: &str, ts: i64, sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_ID_HEADER, HeaderValue::from_str(id).unwrap());
        headers.insert(
            IDENTITY_TIMESTAMP_HEADER,
            HeaderValue::from_str(&ts.to_string()).unwrap(),
        );
        headers.insert(IDENTITY_SIGNATURE_HEADER, HeaderValue::from_str(sig).unwrap());
        headers
    }

    #[test]
    fn processor_accepts_valid_signature() {
        let body = br#"{"id":"evt_1"}"#;
        let headers = processor_headers(&sign_processor(SECRET, body, NOW));
        assert_eq!(verify_processor(Some(SECRET), &headers, body, 300, NOW), Ok(()));
    }

    #[test]
    fn processor_accepts_any_matching_v1() {
        let body = b"{}";
        let good = sign_processor(SECRET, body, NOW);
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t={NOW},v1={},v1={good_sig}", "0".repeat(64));
        assert_eq!(
            verify_processor(Some(SECRET), &processor_headers(&header), body, 300, NOW),
            Ok(())
        );
    }

    #[test]
    fn processor_rejects_tampered_body() {
        let headers = processor_headers(&sign_processor(SECRET, br#"{"amount":1}"#, NOW));
        assert_eq!(
            verify_processor(Some(SECRET), &headers, br#"{"amount":9}"#, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn processor_rejects_wrong_secret() {
        let body = b"{}";
        let headers = processor_headers(&sign_processor("whsec_other", body, NOW));
        assert_eq!(
            verify_processor(Some(SECRET), &headers, body, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn processor_rejects_missing_header() {
        assert_eq!(
            verify_processor(Some(SECRET), &HeaderMap::new(), b"{}", 300, NOW),
            Err(SignatureError::MissingHeader(PROCESSOR_SIGNATURE_HEADER))
        );
    }

    #[test]
    fn processor_rejects_malformed_header() {
        for value in ["garbage", "t=abc,v1=00", "t=1700000000"] {
            assert_eq!(
                verify_processor(Some(SECRET), &processor_headers(value), b"{}", 300, NOW),
                Err(SignatureError::Malformed),
                "header {value}"
            );
        }
    }

    #[test]
    fn processor_rejects_stale_timestamp() {
        let body = b"{}";
        let headers = processor_headers(&sign_processor(SECRET, body, NOW - 301));
        assert_eq!(
            verify_processor(Some(SECRET), &headers, body, 300, NOW),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn processor_without_secret_is_configuration_error() {
        let err = verify_processor(None, &HeaderMap::new(), b"{}", 300, NOW).unwrap_err();
        assert_eq!(err, SignatureError::NotConfigured);
        assert!(err.is_configuration());
        assert!(!SignatureError::Mismatch.is_configuration());
    }

    #[test]
    fn identity_accepts_valid_signature() {
        let body = br#"{"type":"user.created"}"#;
        let sig = sign_identity(IDENTITY_SECRET, "msg_1", NOW, body).unwrap();
        let headers = identity_headers("msg_1", NOW, &format!("v1,bogus {sig}"));
        assert_eq!(
            verify_identity(Some(IDENTITY_SECRET), &headers, body, 300, NOW),
            Ok(())
        );
    }

    #[test]
    fn identity_rejects_id_swap() {
        let body = b"{}";
        let sig = sign_identity(IDENTITY_SECRET, "msg_1", NOW, body).unwrap();
        let headers = identity_headers("msg_2", NOW, &sig);
        assert_eq!(
            verify_identity(Some(IDENTITY_SECRET), &headers, body, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn identity_requires_all_three_headers() {
        let body = b"{}";
        let sig = sign_identity(IDENTITY_SECRET, "msg_1", NOW, body).unwrap();
        for missing in [
            IDENTITY_ID_HEADER,
            IDENTITY_TIMESTAMP_HEADER,
            IDENTITY_SIGNATURE_HEADER,
        ] {
            let mut headers = identity_headers("msg_1", NOW, &sig);
            headers.remove(missing);
            assert_eq!(
                verify_identity(Some(IDENTITY_SECRET), &headers, body, 300, NOW),
                Err(SignatureError::MissingHeader(missing))
            );
        }
    }

    #[test]
    fn identity_secret_must_be_base64() {
        let err =
            verify_identity(Some("whsec_***"), &HeaderMap::new(), b"{}", 300, NOW).unwrap_err();
        assert_eq!(err, SignatureError::InvalidSecret);
        assert!(err.is_configuration());
    }
}
