//! Confirmation channel adapters.
//!
//! Each adapter only normalizes its input into a [`ReconciliationOutcome`]
//! and hands it to the [`Reconciler`]:
//!
//! - direct confirm: the client names the intent; we ask the processor
//! - session poll: the client names a hosted session; we ask the processor
//!   and check the session belongs to the order
//! - webhook: the processor pushes a signed event; no processor call
//!
//! Processor failures leave the order untouched. Webhooks are acknowledged
//! whenever the payload is authentic, including events that resolve to no
//! known order, so the processor never retries an unrecoverable event.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use storefront_core::OrderId;
use storefront_orders::{Channel, Order, ReconciliationOutcome, ReferenceKind, ResolvedState};
use storefront_payments::{
    PaymentProcessor, ProcessorError, WebhookEvent, WebhookResolution, resolve_intent,
    resolve_session, resolve_webhook,
};

use crate::error::CheckoutError;
use crate::ledger::OrderLedger;
use crate::orchestrator::call_processor;
use crate::reconciler::{ReconcileError, Reconciler};

/// What a client-driven channel did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Applied,
    Unchanged,
    /// The reference was replaced by a newer one while the call was in flight.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub order: Order,
    pub state: ResolvedState,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Unchanged,
    Superseded,
    /// Event type this system does not act on.
    Ignored,
    /// Authentic, but no known order correlates with it.
    Dropped,
}

/// Body returned to the processor; always a success acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    pub outcome: WebhookOutcome,
}

impl WebhookAck {
    fn new(event: &WebhookEvent, outcome: WebhookOutcome) -> Self {
        Self {
            received: true,
            event_id: event.id.clone(),
            outcome,
        }
    }
}

#[derive(Clone)]
pub struct ConfirmationChannels {
    ledger: Arc<dyn OrderLedger>,
    processor: Arc<dyn PaymentProcessor>,
    reconciler: Reconciler,
    processor_timeout: Duration,
}

impl core::fmt::Debug for ConfirmationChannels {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfirmationChannels")
            .field("processor_timeout", &self.processor_timeout)
            .finish_non_exhaustive()
    }
}

fn not_found(order_id: OrderId) -> CheckoutError {
    CheckoutError::NotFound(format!("order {order_id}"))
}

impl ConfirmationChannels {
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        processor: Arc<dyn PaymentProcessor>,
        reconciler: Reconciler,
        processor_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            processor,
            reconciler,
            processor_timeout,
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<Order, CheckoutError> {
        self.ledger
            .get(order_id)
            .await?
            .ok_or_else(|| not_found(order_id))
    }

    async fn settle(
        &self,
        outcome: ReconciliationOutcome,
    ) -> Result<ChannelReport, CheckoutError> {
        let state = outcome.state.clone();
        let order_id = outcome.order_id;
        match self.reconciler.reconcile(outcome).await {
            Ok(rec) => Ok(ChannelReport {
                disposition: if rec.changed() {
                    Disposition::Applied
                } else {
                    Disposition::Unchanged
                },
                order: rec.order,
                state,
            }),
            Err(ReconcileError::Conflict(_)) => Ok(ChannelReport {
                order: self.load(order_id).await?,
                state,
                disposition: Disposition::Superseded,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Direct confirm channel.
    ///
    /// `reference_id` must be the order's current intent; anything else is
    /// rejected before the processor is asked.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn confirm_payment(
        &self,
        order_id: OrderId,
        reference_id: &str,
    ) -> Result<ChannelReport, CheckoutError> {
        let reference_id = reference_id.trim();
        if reference_id.is_empty() {
            return Err(CheckoutError::validation("reference_id is required"));
        }
        let order = self.load(order_id).await?;
        let Some(current) = order.current_reference() else {
            return Err(CheckoutError::validation("order has no payment reference"));
        };
        if current.id != reference_id {
            return Err(CheckoutError::validation(
                "reference does not belong to this order",
            ));
        }
        if current.kind != ReferenceKind::Intent {
            return Err(CheckoutError::validation(
                "current reference is a checkout session; verify the session instead",
            ));
        }

        let intent = call_processor(
            self.processor_timeout,
            self.processor.retrieve_intent(reference_id),
        )
        .await?;
        if intent
            .metadata
            .get("order_id")
            .is_some_and(|id| id != &order_id.to_string())
        {
            return Err(CheckoutError::validation(
                "payment intent belongs to a different order",
            ));
        }

        self.settle(ReconciliationOutcome {
            order_id,
            reference_id: intent.id.clone(),
            state: resolve_intent(&intent),
            channel: Channel::Confirm,
        })
        .await
    }

    /// Session-poll channel.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn verify_checkout_session(
        &self,
        order_id: OrderId,
        session_id: &str,
    ) -> Result<ChannelReport, CheckoutError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(CheckoutError::validation("session_id is required"));
        }
        self.load(order_id).await?;

        let session = match call_processor(
            self.processor_timeout,
            self.processor.retrieve_session(session_id),
        )
        .await
        {
            Ok(session) => session,
            Err(ProcessorError::NotFound(_)) => {
                return Err(CheckoutError::validation("unknown checkout session"));
            }
            Err(e) => return Err(e.into()),
        };

        let owner = session.metadata.get("order_id").map(String::as_str);
        if owner != Some(order_id.to_string().as_str()) {
            warn!(session_id, owner = ?owner, "checkout session does not belong to order");
            return Err(CheckoutError::validation(
                "session does not belong to this order",
            ));
        }

        self.settle(ReconciliationOutcome {
            order_id,
            reference_id: session.id.clone(),
            state: resolve_session(&session),
            channel: Channel::SessionPoll,
        })
        .await
    }

    /// Webhook channel.
    ///
    /// Only an unauthentic payload (`Validation`) or a storage failure
    /// (`Storage`, so the processor retries later) is an error.
    #[instrument(skip(self, payload, signature), fields(bytes = payload.len()), err)]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookAck, CheckoutError> {
        let event = self.processor.verify_webhook(payload, signature)?;

        let state = match resolve_webhook(&event) {
            WebhookResolution::Resolved(state) => state,
            WebhookResolution::Ignored => {
                info!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
                return Ok(WebhookAck::new(&event, WebhookOutcome::Ignored));
            }
        };

        let Some(order_id) = self.correlate(&event).await? else {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                reference_id = %event.data.reference_id,
                "webhook event matches no known order; dropped"
            );
            return Ok(WebhookAck::new(&event, WebhookOutcome::Dropped));
        };

        let outcome = ReconciliationOutcome {
            order_id,
            reference_id: event.data.reference_id.clone(),
            state,
            channel: Channel::Webhook,
        };
        let result = match self.reconciler.reconcile(outcome).await {
            Ok(rec) if rec.changed() => WebhookOutcome::Applied,
            Ok(_) => WebhookOutcome::Unchanged,
            Err(ReconcileError::Conflict(_)) => WebhookOutcome::Superseded,
            Err(ReconcileError::NotFound(_)) => WebhookOutcome::Dropped,
            Err(ReconcileError::Domain(e)) => {
                error!(event_id = %event.id, error = %e, "webhook event rejected by order rules");
                WebhookOutcome::Dropped
            }
            Err(e @ (ReconcileError::Ledger(_) | ReconcileError::Inventory(_))) => {
                return Err(e.into());
            }
        };
        Ok(WebhookAck::new(&event, result))
    }

    /// Find the order an event is about: by indexed reference first, then by
    /// the order id echoed in metadata. A confirmation token in metadata
    /// must match the order's.
    async fn correlate(&self, event: &WebhookEvent) -> Result<Option<OrderId>, CheckoutError> {
        let order_id = match self.ledger.find_by_reference(&event.data.reference_id).await? {
            Some(order_id) => order_id,
            None => match event
                .metadata_value("order_id")
                .and_then(|raw| raw.parse::<OrderId>().ok())
            {
                Some(order_id) => order_id,
                None => return Ok(None),
            },
        };

        let Some(order) = self.ledger.get(order_id).await? else {
            return Ok(None);
        };
        if let Some(token) = event.metadata_value("confirmation_token") {
            if token != order.confirmation_token() {
                warn!(event_id = %event.id, order_id = %order_id, "webhook token does not match order");
                return Ok(None);
            }
        }
        Ok(Some(order_id))
    }
}
