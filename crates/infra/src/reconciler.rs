//! Confirmation Reconciler.
//!
//! All three confirmation channels end up in [`Reconciler::reconcile`]. For
//! one outcome it:
//!
//! 1. locks the order (per-order serialization, no global lock)
//! 2. classifies the outcome against the locked state ([`Order::assess`])
//! 3. for a first success, decrements inventory keyed by order id
//! 4. commits the new order state and releases the lock
//! 5. notifies, outside the lock and best effort
//!
//! Racing duplicates queue on the lock and observe the committed state, so
//! they reduce to no-ops. If anything fails before the commit, the lock is
//! dropped, the order stays unchanged and a later signal can retry; the
//! inventory key makes that retry safe.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use storefront_core::{Aggregate, DomainError, OrderId};
use storefront_inventory::DecrementOutcome;
use storefront_orders::{
    ApplyOutcome, Assessment, Order, OrderCommand, PaymentStatus, ReconciliationOutcome,
    ResolvedState,
};

use crate::error::CheckoutError;
use crate::inventory::{InventoryEngine, InventoryError, lines_for_order};
use crate::ledger::{LedgerError, OrderLedger};
use crate::notify::Notifier;

/// An outcome that names a reference which is not the order's current one.
///
/// Internal only: channels acknowledge and log it, they never surface it as
/// a client or processor error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("reference {reference_id} is not the current payment reference of order {order_id}")]
pub struct ReconciliationConflict {
    pub order_id: OrderId,
    pub reference_id: String,
    pub current: Option<String>,
    /// The superseded reference reported captured funds.
    pub reported_success: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("order not found: {0}")]
    NotFound(OrderId),

    #[error(transparent)]
    Conflict(ReconciliationConflict),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Inventory(InventoryError),

    #[error(transparent)]
    Domain(DomainError),
}

impl From<LedgerError> for ReconcileError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound(order_id) => ReconcileError::NotFound(order_id),
            other => ReconcileError::Ledger(other),
        }
    }
}

impl From<InventoryError> for ReconcileError {
    fn from(value: InventoryError) -> Self {
        ReconcileError::Inventory(value)
    }
}

impl From<DomainError> for ReconcileError {
    fn from(value: DomainError) -> Self {
        ReconcileError::Domain(value)
    }
}

impl From<ReconcileError> for CheckoutError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::NotFound(order_id) => {
                CheckoutError::NotFound(format!("order {order_id}"))
            }
            ReconcileError::Conflict(c) => CheckoutError::Conflict(c.to_string()),
            ReconcileError::Ledger(e) => e.into(),
            ReconcileError::Inventory(e) => e.into(),
            ReconcileError::Domain(e) => e.into(),
        }
    }
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Order state after the outcome was applied (or found to be a no-op).
    pub order: Order,
    pub assessment: Assessment,
    /// Set only when this outcome completed the payment.
    pub decrement: Option<DecrementOutcome>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        self.assessment.mutates()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn OrderLedger>,
    inventory: Arc<dyn InventoryEngine>,
    notifier: Notifier,
}

impl core::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reconciler")
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        inventory: Arc<dyn InventoryEngine>,
        notifier: Notifier,
    ) -> Self {
        Self {
            ledger,
            inventory,
            notifier,
        }
    }

    /// Apply one normalized outcome, exactly once in effect.
    #[instrument(
        skip(self, outcome),
        fields(
            order_id = %outcome.order_id,
            reference_id = %outcome.reference_id,
            channel = outcome.channel.as_str(),
            state = outcome.state.label(),
        ),
        err
    )]
    pub async fn reconcile(
        &self,
        outcome: ReconciliationOutcome,
    ) -> Result<Reconciliation, ReconcileError> {
        let lock = self.ledger.lock(outcome.order_id).await?;
        let mut order = lock.order().clone();
        let assessment = order.assess(&outcome);

        if let Assessment::Superseded { current } = &assessment {
            let conflict = ReconciliationConflict {
                order_id: outcome.order_id,
                reference_id: outcome.reference_id.clone(),
                current: current.clone(),
                reported_success: outcome.state == ResolvedState::Succeeded,
            };
            if conflict.reported_success {
                error!(current = ?conflict.current, "superseded reference reported a successful payment");
            } else {
                warn!(current = ?conflict.current, "outcome for superseded reference ignored");
            }
            return Err(ReconcileError::Conflict(conflict));
        }

        if !assessment.mutates() {
            info!(
                assessment = assessment.label(),
                payment_status = %order.payment_status(),
                "outcome absorbed without change"
            );
            return Ok(Reconciliation {
                order,
                assessment,
                decrement: None,
            });
        }

        order.execute(&OrderCommand::ApplyOutcome(ApplyOutcome {
            outcome: outcome.clone(),
            occurred_at: Utc::now(),
        }))?;

        let decrement = if assessment == Assessment::Complete {
            let decrement = self
                .inventory
                .decrement_for_order(order.id_typed(), &lines_for_order(&order))
                .await?;
            log_decrement(&decrement);
            Some(decrement)
        } else {
            None
        };

        lock.commit(&order).await?;
        info!(
            assessment = assessment.label(),
            payment_status = %order.payment_status(),
            "reconciliation applied"
        );

        match &assessment {
            Assessment::Complete => self.notifier.notify_success(&order).await,
            Assessment::Fail { reason, .. } => self.notifier.notify_failure(&order, reason).await,
            _ => {}
        }

        Ok(Reconciliation {
            order,
            assessment,
            decrement,
        })
    }

    /// Client-reported cancellation: failure notification only, no ledger change.
    ///
    /// Returns `false` when the order is already paid and nothing was sent.
    #[instrument(skip(self, reason), fields(order_id = %order_id), err)]
    pub async fn report_cancellation(
        &self,
        order_id: OrderId,
        reason: Option<&str>,
    ) -> Result<bool, ReconcileError> {
        let order = self
            .ledger
            .get(order_id)
            .await?
            .ok_or(ReconcileError::NotFound(order_id))?;
        if order.payment_status() == PaymentStatus::Completed {
            info!("cancellation reported for a paid order; not notifying");
            return Ok(false);
        }

        let reason = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => format!("Payment cancelled: {r}"),
            None => "Payment cancelled by customer".to_string(),
        };
        self.notifier.notify_failure(&order, &reason).await;
        Ok(true)
    }
}

fn log_decrement(decrement: &DecrementOutcome) {
    match decrement {
        DecrementOutcome::Applied { order_id, report } => {
            for change in report.shortfalls() {
                error!(
                    order_id = %order_id,
                    product_id = %change.product_id,
                    requested = change.requested,
                    available = change.before,
                    shortfall = change.shortfall(),
                    "stock shortfall after captured payment"
                );
            }
            if !report.missing.is_empty() {
                error!(
                    order_id = %order_id,
                    missing = ?report.missing,
                    "paid order references products missing from the catalog"
                );
            }
        }
        DecrementOutcome::AlreadyApplied { order_id } => {
            warn!(order_id = %order_id, "inventory already decremented for order");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use storefront_catalog::Product;
    use storefront_core::{AggregateRoot, ProductId, TaxRate};
    use storefront_orders::{
        Address, AttachReference, Channel, Customer, OrderItem, PaymentReference, PlaceOrder,
        ReferenceKind,
    };

    use crate::catalog::InMemoryCatalog;
    use crate::ledger::InMemoryOrderLedger;
    use crate::notify::{InMemoryNotifier, NotificationKind};

    struct Fixture {
        reconciler: Reconciler,
        ledger: Arc<InMemoryOrderLedger>,
        catalog: Arc<InMemoryCatalog>,
        notifier: Arc<InMemoryNotifier>,
        product_id: ProductId,
    }

    fn fixture(stock: u32) -> Fixture {
        let product = Product {
            id: ProductId::new(),
            name: "Pump impeller".to_string(),
            description: String::new(),
            price: 10_000,
            quantity: stock,
            active: true,
        };
        let product_id = product.id;
        let ledger = Arc::new(InMemoryOrderLedger::new());
        let catalog = Arc::new(InMemoryCatalog::with_products([product]));
        let notifier = Arc::new(InMemoryNotifier::new());
        let reconciler = Reconciler::new(
            ledger.clone(),
            catalog.clone(),
            Notifier::new(notifier.clone(), "owner@example.com", false, Duration::from_secs(1)),
        );
        Fixture {
            reconciler,
            ledger,
            catalog,
            notifier,
            product_id,
        }
    }

    async fn place(fx: &Fixture, quantity: u32, reference_id: &str) -> OrderId {
        let address = Address {
            line1: "12 Harbour St".to_string(),
            line2: None,
            city: "Halifax".to_string(),
            state: "NS".to_string(),
            postal_code: "B3H 1A1".to_string(),
            country: "CA".to_string(),
        };
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        order
            .execute(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                order_number: "RES000042".to_string(),
                confirmation_token: "tok".to_string(),
                customer: Customer {
                    email: "buyer@example.com".to_string(),
                    first_name: "Ada".to_string(),
                    last_name: "Byron".to_string(),
                    phone: None,
                },
                billing_address: address.clone(),
                shipping_address: address,
                payment_method: "card".to_string(),
                shipping_method: "pickup".to_string(),
                items: vec![OrderItem {
                    product_id: fx.product_id,
                    product_name: "Pump impeller".to_string(),
                    quantity,
                    price: 10_000,
                }],
                tax_rate: TaxRate::from_bps(1300).unwrap(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order
            .execute(&OrderCommand::AttachReference(AttachReference {
                order_id,
                reference: PaymentReference {
                    kind: ReferenceKind::Intent,
                    id: reference_id.to_string(),
                    created_at: Utc::now(),
                },
                occurred_at: Utc::now(),
            }))
            .unwrap();
        fx.ledger.insert(&order).await.unwrap();
        order_id
    }

    fn outcome(order_id: OrderId, reference_id: &str, state: ResolvedState) -> ReconciliationOutcome {
        ReconciliationOutcome {
            order_id,
            reference_id: reference_id.to_string(),
            state,
            channel: Channel::Confirm,
        }
    }

    #[tokio::test]
    async fn first_success_completes_decrements_and_notifies() {
        let fx = fixture(5);
        let order_id = place(&fx, 2, "pi_1").await;

        let rec = fx
            .reconciler
            .reconcile(outcome(order_id, "pi_1", ResolvedState::Succeeded))
            .await
            .unwrap();

        assert!(rec.changed());
        assert_eq!(rec.order.payment_status(), PaymentStatus::Completed);
        assert!(rec.decrement.unwrap().was_applied());
        assert_eq!(fx.catalog.stock(fx.product_id), Some(3));
        assert_eq!(fx.notifier.count(NotificationKind::PaymentSucceeded), 1);

        let stored = fx.ledger.get(order_id).await.unwrap().unwrap();
        assert_eq!(stored, rec.order);
    }

    #[tokio::test]
    async fn repeated_success_is_absorbed() {
        let fx = fixture(5);
        let order_id = place(&fx, 2, "pi_1").await;

        for _ in 0..4 {
            fx.reconciler
                .reconcile(outcome(order_id, "pi_1", ResolvedState::Succeeded))
                .await
                .unwrap();
        }

        assert_eq!(fx.catalog.stock(fx.product_id), Some(3));
        assert_eq!(fx.notifier.count(NotificationKind::PaymentSucceeded), 1);
    }

    #[tokio::test]
    async fn identical_failures_notify_once() {
        let fx = fixture(5);
        let order_id = place(&fx, 1, "pi_1").await;
        let declined = || outcome(order_id, "pi_1", ResolvedState::failed("Card declined"));

        let first = fx.reconciler.reconcile(declined()).await.unwrap();
        let second = fx.reconciler.reconcile(declined()).await.unwrap();

        assert_eq!(first.order.payment_status(), PaymentStatus::Failed);
        assert_eq!(second.assessment, Assessment::DuplicateFailure);
        assert_eq!(fx.notifier.count(NotificationKind::PaymentFailed), 1);
    }

    #[tokio::test]
    async fn expired_session_returns_to_pending() {
        let fx = fixture(5);
        let order_id = place(&fx, 1, "pi_1").await;

        let rec = fx
            .reconciler
            .reconcile(outcome(
                order_id,
                "pi_1",
                ResolvedState::awaiting_retry("Payment session expired"),
            ))
            .await
            .unwrap();

        assert_eq!(rec.order.payment_status(), PaymentStatus::Pending);
        assert_eq!(fx.notifier.count(NotificationKind::PaymentFailed), 1);
    }

    #[tokio::test]
    async fn success_after_failure_still_completes_once() {
        let fx = fixture(3);
        let order_id = place(&fx, 3, "pi_1").await;

        fx.reconciler
            .reconcile(outcome(order_id, "pi_1", ResolvedState::failed("Card declined")))
            .await
            .unwrap();
        let rec = fx
            .reconciler
            .reconcile(outcome(order_id, "pi_1", ResolvedState::Succeeded))
            .await
            .unwrap();

        assert_eq!(rec.order.payment_status(), PaymentStatus::Completed);
        assert_eq!(fx.catalog.stock(fx.product_id), Some(0));
    }

    #[tokio::test]
    async fn pending_signal_is_informational() {
        let fx = fixture(5);
        let order_id = place(&fx, 1, "pi_1").await;

        let rec = fx
            .reconciler
            .reconcile(outcome(order_id, "pi_1", ResolvedState::Pending))
            .await
            .unwrap();

        assert!(!rec.changed());
        assert_eq!(rec.order.version(), 2);
        assert!(fx.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn superseded_reference_is_a_conflict_and_changes_nothing() {
        let fx = fixture(5);
        let order_id = place(&fx, 1, "pi_new").await;

        let err = fx
            .reconciler
            .reconcile(outcome(order_id, "pi_old", ResolvedState::Succeeded))
            .await
            .unwrap_err();

        match err {
            ReconcileError::Conflict(c) => {
                assert!(c.reported_success);
                assert_eq!(c.current.as_deref(), Some("pi_new"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(fx.catalog.stock(fx.product_id), Some(5));
        let stored = fx.ledger.get(order_id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn oversell_completes_payment_and_reports_shortfall() {
        let fx = fixture(1);
        let order_id = place(&fx, 3, "pi_1").await;

        let rec = fx
            .reconciler
            .reconcile(outcome(order_id, "pi_1", ResolvedState::Succeeded))
            .await
            .unwrap();

        assert_eq!(rec.order.payment_status(), PaymentStatus::Completed);
        match rec.decrement.unwrap() {
            DecrementOutcome::Applied { report, .. } => assert!(report.has_shortfall()),
            other => panic!("expected applied decrement, got {other:?}"),
        }
        assert_eq!(fx.catalog.stock(fx.product_id), Some(0));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let fx = fixture(1);
        let missing = OrderId::new();
        let err = fx
            .reconciler
            .reconcile(outcome(missing, "pi_1", ResolvedState::Succeeded))
            .await
            .unwrap_err();
        assert_eq!(err, ReconcileError::NotFound(missing));
    }

    #[tokio::test]
    async fn cancellation_report_skips_paid_orders() {
        let fx = fixture(5);
        let order_id = place(&fx, 1, "pi_1").await;

        assert!(
            fx.reconciler
                .report_cancellation(order_id, Some("changed my mind"))
                .await
                .unwrap()
        );
        let sent = fx.notifier.sent();
        assert!(sent[0].body.contains("Payment cancelled: changed my mind"));

        fx.reconciler
            .reconcile(outcome(order_id, "pi_1", ResolvedState::Succeeded))
            .await
            .unwrap();
        assert!(!fx.reconciler.report_cancellation(order_id, None).await.unwrap());
        assert_eq!(fx.notifier.count(NotificationKind::PaymentFailed), 1);

        let stored = fx.ledger.get(order_id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Completed);
    }
}
