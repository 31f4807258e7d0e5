//! Signed webhook envelope.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex hmac>` where
//! the MAC is HMAC-SHA256 over `"<t>.<raw body>"` keyed by the shared secret.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::processor::Metadata;
use crate::status::SessionPaymentStatus;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-processor-signature";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("timestamp outside tolerance")]
    StaleTimestamp,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Processor-neutral event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: WebhookData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookData {
    /// Intent or session id the event is about.
    pub reference_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub payment_status: Option<SessionPaymentStatus>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

impl WebhookEvent {
    /// Metadata value echoed back by the processor.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.data.metadata.get(key).map(String::as_str)
    }
}

/// Signs and verifies webhook payloads with a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl core::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| WebhookError::MalformedHeader)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Build the signature header for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    /// Authenticate `payload` against `header` and decode it.
    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<WebhookEvent, WebhookError> {
        if header.trim().is_empty() {
            return Err(WebhookError::MissingSignature);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t.parse::<i64>().map_err(|_| WebhookError::MalformedHeader)?);
            } else if let Some(v) = part.strip_prefix("v1=") {
                signatures.push(v);
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }

        let matched = signatures.iter().any(|sig| {
            let Ok(bytes) = hex::decode(sig) else {
                return false;
            };
            self.mac(timestamp, payload)
                .map(|mac| mac.verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            return Err(WebhookError::SignatureMismatch);
        }

        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(WebhookError::StaleTimestamp);
        }

        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }
}
