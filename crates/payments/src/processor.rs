use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::Cents;

use crate::status::{IntentStatus, SessionPaymentStatus, SessionStatus};
use crate::webhook::{WebhookError, WebhookEvent};

/// Free-form key/value metadata attached to processor objects.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("processor call timed out")]
    Timeout,

    #[error("processor transport error: {0}")]
    Transport(String),

    #[error("processor rejected request: {0}")]
    Rejected(String),

    #[error("processor reference not found: {0}")]
    NotFound(String),

    #[error("webhook rejected: {0}")]
    Webhook(#[from] WebhookError),
}

/// Request for a direct payment reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    pub amount: Cents,
    pub currency: String,
    pub description: String,
    pub receipt_email: Option<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: Cents,
    pub currency: String,
    pub status: IntentStatus,
}

/// One line of a hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount: Cents,
    pub quantity: u32,
}

/// Request for a hosted-session reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Metadata,
}

impl SessionRequest {
    pub fn amount_total(&self) -> Cents {
        self.line_items
            .iter()
            .map(|l| l.unit_amount * Cents::from(l.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    pub url: String,
}

/// Current processor view of a direct payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSnapshot {
    pub id: String,
    pub status: IntentStatus,
    pub amount: Cents,
    pub amount_received: Cents,
    pub last_payment_error: Option<String>,
    pub cancellation_reason: Option<String>,
    pub metadata: Metadata,
}

/// Current processor view of a hosted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub status: SessionStatus,
    pub payment_status: SessionPaymentStatus,
    pub amount_total: Cents,
    pub payment_intent: Option<String>,
    pub metadata: Metadata,
}

/// Port to an external payment processor.
///
/// Implementations must not block indefinitely; callers still wrap every
/// call in a timeout.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_intent(&self, request: IntentRequest) -> Result<CreatedIntent, ProcessorError>;

    async fn create_hosted_session(
        &self,
        request: SessionRequest,
    ) -> Result<CreatedSession, ProcessorError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionSnapshot, ProcessorError>;

    /// Authenticate and decode a pushed event.
    fn verify_webhook(&self, payload: &[u8], signature: &str)
    -> Result<WebhookEvent, ProcessorError>;
}
