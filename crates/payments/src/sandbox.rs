use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;

use crate::processor::{
    CreatedIntent, CreatedSession, IntentRequest, IntentSnapshot, PaymentProcessor,
    ProcessorError, SessionRequest, SessionSnapshot,
};
use crate::status::{IntentStatus, SessionPaymentStatus, SessionStatus};
use crate::webhook::{WebhookError, WebhookEvent, WebhookVerifier};

/// In-process payment processor.
///
/// Intended for dev and tests: references live in memory and their status is
/// driven explicitly through the `*_intent` / `*_session` control methods.
#[derive(Debug)]
pub struct SandboxProcessor {
    intents: RwLock<HashMap<String, IntentSnapshot>>,
    sessions: RwLock<HashMap<String, SessionSnapshot>>,
    verifier: WebhookVerifier,
    checkout_base_url: String,
    latency_ms: AtomicU64,
    unavailable: AtomicBool,
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn poisoned() -> ProcessorError {
    ProcessorError::Transport("sandbox state lock poisoned".to_string())
}

impl SandboxProcessor {
    pub fn new(verifier: WebhookVerifier) -> Self {
        Self {
            intents: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            verifier,
            checkout_base_url: "https://checkout.sandbox.local/pay".to_string(),
            latency_ms: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Delay every processor call, e.g. to exercise caller timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    pub fn intent_count(&self) -> usize {
        self.intents.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn intent(&self, intent_id: &str) -> Option<IntentSnapshot> {
        self.intents.read().ok()?.get(intent_id).cloned()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.read().ok()?.get(session_id).cloned()
    }

    fn update_intent<F>(&self, intent_id: &str, f: F) -> Result<(), ProcessorError>
    where
        F: FnOnce(&mut IntentSnapshot),
    {
        let mut intents = self.intents.write().map_err(|_| poisoned())?;
        let intent = intents
            .get_mut(intent_id)
            .ok_or_else(|| ProcessorError::NotFound(intent_id.to_string()))?;
        f(intent);
        Ok(())
    }

    fn update_session<F>(&self, session_id: &str, f: F) -> Result<(), ProcessorError>
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ProcessorError::NotFound(session_id.to_string()))?;
        f(session);
        Ok(())
    }

    pub fn succeed_intent(&self, intent_id: &str) -> Result<(), ProcessorError> {
        self.update_intent(intent_id, |i| {
            i.status = IntentStatus::Succeeded;
            i.amount_received = i.amount;
            i.last_payment_error = None;
        })
    }

    pub fn decline_intent(&self, intent_id: &str, message: &str) -> Result<(), ProcessorError> {
        self.update_intent(intent_id, |i| {
            i.status = IntentStatus::RequiresPaymentMethod;
            i.last_payment_error = Some(message.to_string());
        })
    }

    pub fn cancel_intent(&self, intent_id: &str, reason: &str) -> Result<(), ProcessorError> {
        self.update_intent(intent_id, |i| {
            i.status = IntentStatus::Canceled;
            i.cancellation_reason = Some(reason.to_string());
        })
    }

    pub fn set_intent_status(
        &self,
        intent_id: &str,
        status: IntentStatus,
    ) -> Result<(), ProcessorError> {
        self.update_intent(intent_id, |i| i.status = status)
    }

    pub fn pay_session(&self, session_id: &str) -> Result<(), ProcessorError> {
        self.update_session(session_id, |s| {
            s.status = SessionStatus::Complete;
            s.payment_status = SessionPaymentStatus::Paid;
            s.payment_intent = Some(format!("pi_{}", random_suffix()));
        })
    }

    pub fn expire_session(&self, session_id: &str) -> Result<(), ProcessorError> {
        self.update_session(session_id, |s| s.status = SessionStatus::Expired)
    }

    /// Serialize and sign `event` the way the processor would push it.
    pub fn signed_webhook(
        &self,
        event: &WebhookEvent,
        timestamp: i64,
    ) -> Result<(Vec<u8>, String), WebhookError> {
        let body =
            serde_json::to_vec(event).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let header = self.verifier.sign(&body, timestamp)?;
        Ok((body, header))
    }

    async fn simulate_network(&self) -> Result<(), ProcessorError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transport(
                "sandbox processor unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn create_intent(&self, request: IntentRequest) -> Result<CreatedIntent, ProcessorError> {
        self.simulate_network().await?;
        if request.amount == 0 {
            return Err(ProcessorError::Rejected(
                "amount must be greater than zero".to_string(),
            ));
        }

        let id = format!("pi_{}", random_suffix());
        let client_secret = format!("{id}_secret_{}", random_suffix());
        let snapshot = IntentSnapshot {
            id: id.clone(),
            status: IntentStatus::RequiresPaymentMethod,
            amount: request.amount,
            amount_received: 0,
            last_payment_error: None,
            cancellation_reason: None,
            metadata: request.metadata,
        };
        self.intents
            .write()
            .map_err(|_| poisoned())?
            .insert(id.clone(), snapshot);

        tracing::debug!(intent_id = %id, amount = request.amount, "sandbox intent created");
        Ok(CreatedIntent {
            id,
            client_secret,
            amount: request.amount,
            currency: request.currency,
            status: IntentStatus::RequiresPaymentMethod,
        })
    }

    async fn create_hosted_session(
        &self,
        request: SessionRequest,
    ) -> Result<CreatedSession, ProcessorError> {
        self.simulate_network().await?;
        if request.line_items.is_empty() {
            return Err(ProcessorError::Rejected(
                "session requires at least one line item".to_string(),
            ));
        }

        let id = format!("cs_{}", random_suffix());
        let snapshot = SessionSnapshot {
            id: id.clone(),
            status: SessionStatus::Open,
            payment_status: SessionPaymentStatus::Unpaid,
            amount_total: request.amount_total(),
            payment_intent: None,
            metadata: request.metadata,
        };
        self.sessions
            .write()
            .map_err(|_| poisoned())?
            .insert(id.clone(), snapshot);

        tracing::debug!(session_id = %id, "sandbox session created");
        Ok(CreatedSession {
            url: format!("{}/{id}", self.checkout_base_url),
            id,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ProcessorError> {
        self.simulate_network().await?;
        self.intent(intent_id)
            .ok_or_else(|| ProcessorError::NotFound(intent_id.to_string()))
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionSnapshot, ProcessorError> {
        self.simulate_network().await?;
        self.session(session_id)
            .ok_or_else(|| ProcessorError::NotFound(session_id.to_string()))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProcessorError> {
        let now = chrono::Utc::now().timestamp();
        Ok(self.verifier.verify(payload, signature, now)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Metadata, SessionLineItem};
    use crate::status::{resolve_intent, resolve_session};
    use storefront_orders::ResolvedState;

    fn sandbox() -> SandboxProcessor {
        SandboxProcessor::new(WebhookVerifier::new("whsec_test", 300))
    }

    fn intent_request(amount: u64) -> IntentRequest {
        IntentRequest {
            amount,
            currency: "cad".to_string(),
            description: "Order".to_string(),
            receipt_email: None,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn intent_lifecycle_is_driven_by_controls() {
        let processor = sandbox();
        let created = processor.create_intent(intent_request(2_260)).await.unwrap();
        assert!(created.client_secret.starts_with(&created.id));

        let snapshot = processor.retrieve_intent(&created.id).await.unwrap();
        assert_eq!(resolve_intent(&snapshot), ResolvedState::Pending);

        processor.succeed_intent(&created.id).unwrap();
        let snapshot = processor.retrieve_intent(&created.id).await.unwrap();
        assert_eq!(resolve_intent(&snapshot), ResolvedState::Succeeded);
        assert_eq!(snapshot.amount_received, 2_260);
    }

    #[tokio::test]
    async fn session_totals_line_items() {
        let processor = sandbox();
        let created = processor
            .create_hosted_session(SessionRequest {
                currency: "cad".to_string(),
                line_items: vec![
                    SessionLineItem {
                        name: "Pump".to_string(),
                        unit_amount: 10_000,
                        quantity: 2,
                    },
                    SessionLineItem {
                        name: "Tax".to_string(),
                        unit_amount: 2_600,
                        quantity: 1,
                    },
                ],
                customer_email: None,
                success_url: "http://localhost/ok".to_string(),
                cancel_url: "http://localhost/cancel".to_string(),
                metadata: Metadata::new(),
            })
            .await
            .unwrap();

        let snapshot = processor.retrieve_session(&created.id).await.unwrap();
        assert_eq!(snapshot.amount_total, 22_600);
        assert!(created.url.ends_with(&created.id));

        processor.expire_session(&created.id).unwrap();
        let snapshot = processor.retrieve_session(&created.id).await.unwrap();
        assert_eq!(
            resolve_session(&snapshot),
            ResolvedState::awaiting_retry("Payment session expired")
        );
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let err = sandbox().retrieve_intent("pi_missing").await.unwrap_err();
        assert_eq!(err, ProcessorError::NotFound("pi_missing".to_string()));
    }

    #[tokio::test]
    async fn unavailable_processor_reports_transport_error() {
        let processor = sandbox();
        processor.set_unavailable(true);
        let err = processor.create_intent(intent_request(100)).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Transport(_)));
        assert_eq!(processor.intent_count(), 0);
    }
}
