//! Payment callback signature verification.
//!
//! The provider signs every callback with
//! `x-orchard-signature: t=<unix seconds>,v1=<hex hmac-sha256>` computed over
//! `"<t>.<raw body>"` with the shared webhook secret.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-orchard-signature";

/// Maximum clock skew accepted between signing and verification.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Signature verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedSignature,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies payment callbacks against the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
}

impl WebhookVerifier {
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Verify a signature header against the raw request body at `now`.
    ///
    /// # Errors
    ///
    /// Returns a `WebhookError` describing why the callback is rejected.
    pub fn verify(
        &self,
        header: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;
        let (timestamp, signature) = parse_header(header)?;

        if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(WebhookError::Expired);
        }

        let expected = self.sign(timestamp, body)?;
        if !constant_time_compare(&expected, signature) {
            return Err(WebhookError::Mismatch);
        }

        debug!("Payment callback signature verified");
        Ok(())
    }

    /// Produce a header value for `body` signed at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSignature` if the secret cannot key the MAC.
    pub fn header_for(&self, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
        Ok(format!("t={timestamp},v1={}", self.sign(timestamp, body)?))
    }

    fn sign(&self, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| WebhookError::MalformedSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn parse_header(header: &str) -> Result<(i64, &str), WebhookError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }
    match (timestamp, signature) {
        (Some(t), Some(sig)) if !sig.is_empty() => Ok((t, sig)),
        _ => Err(WebhookError::MalformedSignature),
    }
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::from("whsec_test_9f8e7d6c5b4a39281706f5e4d3c2b1a0"))
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(constant_time_compare("", ""));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }

    #[test]
    fn test_valid_signature_accepted() {
        let verifier = verifier();
        let now = Utc::now();
        let body = br#"{"reference_id":"REF-1","status":"paid"}"#;
        let header = verifier.header_for(now.timestamp(), body).unwrap();

        assert_eq!(verifier.verify(Some(&header), body, now), Ok(()));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let verifier = verifier();
        let now = Utc::now();
        let header = verifier.header_for(now.timestamp(), b"{\"status\":\"failed\"}").unwrap();

        assert_eq!(
            verifier.verify(Some(&header), b"{\"status\":\"paid\"}", now),
            Err(WebhookError::Mismatch)
        );
    }

    #[test]
    fn test_old_timestamp_rejected() {
        let verifier = verifier();
        let now = Utc::now();
        let signed_at = now - TimeDelta::seconds(SIGNATURE_TOLERANCE_SECS + 1);
        let header = verifier.header_for(signed_at.timestamp(), b"{}").unwrap();

        assert_eq!(
            verifier.verify(Some(&header), b"{}", now),
            Err(WebhookError::Expired)
        );
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let verifier = verifier();
        let now = Utc::now();
        assert_eq!(
            verifier.verify(None, b"{}", now),
            Err(WebhookError::MissingSignature)
        );
        assert_eq!(
            verifier.verify(Some("v1=abc"), b"{}", now),
            Err(WebhookError::MalformedSignature)
        );
        assert_eq!(
            verifier.verify(Some("t=notanumber,v1=abc"), b"{}", now),
            Err(WebhookError::MalformedSignature)
        );
    }
}
