//! Processor status vocabulary and its translation into resolved states.

use serde::{Deserialize, Serialize};

use storefront_orders::ResolvedState;

use crate::processor::{IntentSnapshot, SessionSnapshot};
use crate::webhook::WebhookEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Unknown,
}

impl SessionPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPaymentStatus::Paid => "paid",
            SessionPaymentStatus::Unpaid => "unpaid",
            SessionPaymentStatus::NoPaymentRequired => "no_payment_required",
            SessionPaymentStatus::Unknown => "unknown",
        }
    }
}

fn cancelled(reason: Option<&str>) -> ResolvedState {
    ResolvedState::failed(format!(
        "Payment cancelled: {}",
        reason.unwrap_or("unknown reason")
    ))
}

/// Map a direct payment's processor status.
pub fn resolve_intent(intent: &IntentSnapshot) -> ResolvedState {
    match intent.status {
        IntentStatus::Succeeded => ResolvedState::Succeeded,
        IntentStatus::Processing | IntentStatus::RequiresCapture => ResolvedState::Processing,
        IntentStatus::RequiresConfirmation | IntentStatus::RequiresAction => {
            ResolvedState::Pending
        }
        IntentStatus::RequiresPaymentMethod => match intent.last_payment_error.as_deref() {
            Some(message) => ResolvedState::awaiting_retry(message),
            None => ResolvedState::Pending,
        },
        IntentStatus::Canceled => cancelled(intent.cancellation_reason.as_deref()),
        IntentStatus::Unknown => ResolvedState::Pending,
    }
}

/// Map a hosted session's processor status.
pub fn resolve_session(session: &SessionSnapshot) -> ResolvedState {
    if session.status == SessionStatus::Expired {
        return ResolvedState::awaiting_retry("Payment session expired");
    }
    match session.payment_status {
        SessionPaymentStatus::Paid => ResolvedState::Succeeded,
        SessionPaymentStatus::Unpaid => ResolvedState::Pending,
        other => ResolvedState::failed(format!(
            "Payment verification failed - {}",
            other.as_str()
        )),
    }
}

/// What a webhook event means for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookResolution {
    Resolved(ResolvedState),
    /// Event type this system does not act on; acknowledged and dropped.
    Ignored,
}

/// Map a pushed event by type.
pub fn resolve_webhook(event: &WebhookEvent) -> WebhookResolution {
    let data = &event.data;
    let state = match event.event_type.as_str() {
        "payment_intent.succeeded" => ResolvedState::Succeeded,
        "payment_intent.payment_failed" => ResolvedState::failed(
            data.failure_message
                .clone()
                .unwrap_or_else(|| "Payment failed".to_string()),
        ),
        "payment_intent.canceled" => cancelled(data.cancellation_reason.as_deref()),
        "payment_intent.processing" => ResolvedState::Processing,
        "checkout.session.completed" => match data.payment_status {
            Some(SessionPaymentStatus::Paid) => ResolvedState::Succeeded,
            _ => ResolvedState::Pending,
        },
        "checkout.session.expired" => ResolvedState::awaiting_retry("Payment session expired"),
        _ => return WebhookResolution::Ignored,
    };
    WebhookResolution::Resolved(state)
}
