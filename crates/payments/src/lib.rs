//! Payment processor boundary.
//!
//! `PaymentProcessor` is the port every processor integration implements.
//! Processor-specific statuses are translated into the neutral
//! [`storefront_orders::ResolvedState`] here, so the reconciler never sees a
//! processor's vocabulary. Webhook payloads are authenticated with an
//! HMAC-SHA256 signature header before they are decoded.

pub mod processor;
pub mod sandbox;
pub mod status;
pub mod webhook;

pub use processor::{
    CreatedIntent, CreatedSession, IntentRequest, IntentSnapshot, Metadata, PaymentProcessor,
    ProcessorError, SessionLineItem, SessionRequest, SessionSnapshot,
};
pub use sandbox::SandboxProcessor;
pub use status::{
    IntentStatus, SessionPaymentStatus, SessionStatus, WebhookResolution, resolve_intent,
    resolve_session, resolve_webhook,
};
pub use webhook::{SIGNATURE_HEADER, WebhookData, WebhookError, WebhookEvent, WebhookVerifier};
