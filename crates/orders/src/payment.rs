use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::OrderId;

/// Payment lifecycle of an order.
///
/// `Completed` and `Failed` are absorbing for incoming signals; only a newly
/// attached reference moves an order back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of external payment handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Direct payment completed client-side.
    Intent,
    /// Processor-hosted checkout page.
    Session,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Intent => "intent",
            ReferenceKind::Session => "session",
        }
    }
}

/// External processor handle attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub kind: ReferenceKind,
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// What happens to the order after a failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    /// The attempt is over; `payment_status` becomes `failed`.
    Terminal,
    /// The attempt lapsed (unpaid, expired) and a new one is expected;
    /// `payment_status` goes back to `pending`.
    AwaitingRetry,
}

/// Normalized meaning of a processor status, whatever channel reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResolvedState {
    Succeeded,
    Processing,
    Pending,
    Failed {
        reason: String,
        disposition: FailureDisposition,
    },
}

impl ResolvedState {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            disposition: FailureDisposition::Terminal,
        }
    }

    pub fn awaiting_retry(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            disposition: FailureDisposition::AwaitingRetry,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResolvedState::Succeeded => "succeeded",
            ResolvedState::Processing => "processing",
            ResolvedState::Pending => "pending",
            ResolvedState::Failed { .. } => "failed",
        }
    }
}

/// Channel a signal arrived through. Only used for logging and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Confirm,
    Webhook,
    SessionPoll,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Confirm => "confirm",
            Channel::Webhook => "webhook",
            Channel::SessionPoll => "session_poll",
        }
    }
}

/// A normalized payment signal for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub order_id: OrderId,
    pub reference_id: String,
    pub state: ResolvedState,
    pub channel: Channel,
}

/// The last failure the order was notified about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reference_id: String,
    pub reason: String,
}

/// How an order reacts to an outcome, before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// Payment already completed; every later signal is a no-op.
    AlreadyCompleted,
    /// The signal is for a reference that is not the order's current one.
    Superseded { current: Option<String> },
    /// First success: complete the payment, decrement stock, notify.
    Complete,
    /// Record the failure and notify.
    Fail {
        reason: String,
        disposition: FailureDisposition,
    },
    /// Identical failure already recorded for this reference.
    DuplicateFailure,
    /// Move `pending` to `processing`.
    MarkProcessing,
    /// Nothing to do.
    Informational,
}

impl Assessment {
    /// Whether applying the outcome changes the order.
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Assessment::Complete | Assessment::Fail { .. } | Assessment::MarkProcessing
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Assessment::AlreadyCompleted => "already_completed",
            Assessment::Superseded { .. } => "superseded_reference",
            Assessment::Complete => "complete",
            Assessment::Fail { .. } => "fail",
            Assessment::DuplicateFailure => "duplicate_failure",
            Assessment::MarkProcessing => "mark_processing",
            Assessment::Informational => "informational",
        }
    }
}
