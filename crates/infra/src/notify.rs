//! Notification Dispatcher.
//!
//! Owner and customer messages are rendered as plain text here and handed to
//! a [`NotificationDispatcher`]. Delivery is best effort: [`Notifier`] bounds
//! every delivery with a timeout and only logs failures, so a broken mail
//! path can never undo or retry a ledger transition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use storefront_core::Cents;
use storefront_orders::{Address, Order};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notification delivery timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentSucceeded,
    PaymentFailed,
    CustomerConfirmation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub order_number: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Transport for rendered notifications.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Default dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            kind = ?notification.kind,
            order_number = %notification.order_number,
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Records every delivered notification. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following delivery fail.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .map(|s| s.iter().filter(|n| n.kind == kind).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| NotifyError::Delivery("lock poisoned".to_string()))?;
        if *failing {
            return Err(NotifyError::Delivery("dispatcher unavailable".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| NotifyError::Delivery("lock poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}

/// Renders order notifications and delivers them fire-and-forget.
#[derive(Clone)]
pub struct Notifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
    owner_email: String,
    customer_confirmation: bool,
    timeout: Duration,
}

impl core::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Notifier")
            .field("owner_email", &self.owner_email)
            .field("customer_confirmation", &self.customer_confirmation)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        owner_email: impl Into<String>,
        customer_confirmation: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            owner_email: owner_email.into(),
            customer_confirmation,
            timeout,
        }
    }

    /// Owner message for a newly completed payment, plus the customer
    /// confirmation when enabled.
    pub async fn notify_success(&self, order: &Order) {
        self.send(render_success(order, &self.owner_email)).await;
        if self.customer_confirmation {
            self.notify_customer_confirmation(order).await;
        }
    }

    pub async fn notify_failure(&self, order: &Order, reason: &str) {
        self.send(render_failure(order, &self.owner_email, reason))
            .await;
    }

    pub async fn notify_customer_confirmation(&self, order: &Order) {
        self.send(render_customer_confirmation(order)).await;
    }

    async fn send(&self, notification: Notification) {
        let delivery = tokio::time::timeout(self.timeout, self.dispatcher.deliver(&notification));
        let result = match delivery.await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout),
        };
        if let Err(e) = result {
            error!(
                kind = ?notification.kind,
                order_number = %notification.order_number,
                error = %e,
                "notification not delivered"
            );
        }
    }
}

/// `12345` -> `"$123.45"`.
pub fn format_cents(amount: Cents) -> String {
    format!("${}.{:02}", amount / 100, amount % 100)
}

fn render_address(address: &Address) -> String {
    let mut out = address.line1.clone();
    if let Some(line2) = address.line2.as_deref().filter(|l| !l.is_empty()) {
        out.push_str(", ");
        out.push_str(line2);
    }
    out.push_str(&format!(
        "\n{}, {} {}\n{}",
        address.city, address.state, address.postal_code, address.country
    ));
    out
}

fn render_success(order: &Order, owner_email: &str) -> Notification {
    let customer = order.customer();
    let mut body = format!(
        "NEW ORDER - PAYMENT SUCCESSFUL\n\n\
         Order Number: {}\n\
         Payment Status: {}\n\
         Order Status: {}\n\n\
         Customer: {}\n\
         Email: {}\n\
         Phone: {}\n\n\
         Billing Address:\n{}\n\n\
         Shipping Address:\n{}\n\n\
         Items:\n",
        order.order_number(),
        order.payment_status(),
        order.status().as_str(),
        customer.full_name(),
        customer.email,
        customer.phone.as_deref().unwrap_or("Not provided"),
        render_address(order.billing_address()),
        render_address(order.shipping_address()),
    );
    for (n, item) in order.items().iter().enumerate() {
        body.push_str(&format!(
            "  {}. {} x{} @ {} = {}\n",
            n + 1,
            item.product_name,
            item.quantity,
            format_cents(item.price),
            format_cents(item.line_total()),
        ));
    }
    body.push_str(&format!(
        "\nSubtotal: {}\nTax: {}\nTotal: {}\nPayment Method: {}\nShipping Method: {}\n",
        format_cents(order.subtotal()),
        format_cents(order.tax_amount()),
        format_cents(order.total_amount()),
        order.payment_method(),
        order.shipping_method(),
    ));

    Notification {
        kind: NotificationKind::PaymentSucceeded,
        order_number: order.order_number().to_string(),
        recipient: owner_email.to_string(),
        subject: format!("New Order Received - Order #{}", order.order_number()),
        body,
    }
}

fn failure_label(reason: &str) -> &'static str {
    let reason = reason.to_ascii_lowercase();
    if reason.contains("cancel") {
        "CANCELLED"
    } else if reason.contains("expired") {
        "EXPIRED"
    } else {
        "FAILED"
    }
}

fn render_failure(order: &Order, owner_email: &str, reason: &str) -> Notification {
    let customer = order.customer();
    let label = failure_label(reason);
    let items: Vec<String> = order
        .items()
        .iter()
        .map(|i| format!("  - {} x{} @ {}", i.product_name, i.quantity, format_cents(i.price)))
        .collect();
    let body = format!(
        "ORDER PAYMENT {label}\n\n\
         Order Number: {}\n\
         Payment Status: {}\n\
         Reason: {reason}\n\n\
         Customer: {}\n\
         Email: {}\n\
         Phone: {}\n\n\
         Items:\n{}\n\n\
         Order Total: {}\n",
        order.order_number(),
        order.payment_status(),
        customer.full_name(),
        customer.email,
        customer.phone.as_deref().unwrap_or("Not provided"),
        items.join("\n"),
        format_cents(order.total_amount()),
    );

    Notification {
        kind: NotificationKind::PaymentFailed,
        order_number: order.order_number().to_string(),
        recipient: owner_email.to_string(),
        subject: format!("Order Payment {label} - Order #{}", order.order_number()),
        body,
    }
}

fn render_customer_confirmation(order: &Order) -> Notification {
    let customer = order.customer();
    let body = format!(
        "Hi {},\n\n\
         Thank you for your order. Payment for order {} has been received.\n\n\
         Total charged: {}\n\
         Shipping to:\n{}\n\n\
         We will contact you about delivery.\n",
        customer.first_name,
        order.order_number(),
        format_cents(order.total_amount()),
        render_address(order.shipping_address()),
    );

    Notification {
        kind: NotificationKind::CustomerConfirmation,
        order_number: order.order_number().to_string(),
        recipient: customer.email.clone(),
        subject: format!("Order Confirmation - {}", order.order_number()),
        body,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use storefront_core::{Aggregate, OrderId, ProductId, TaxRate};
    use storefront_orders::{Customer, OrderCommand, OrderItem, PlaceOrder};

    pub(crate) fn placed_order() -> Order {
        let address = Address {
            line1: "12 Harbour St".to_string(),
            line2: Some("Unit 4".to_string()),
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
                order_number: "RES004211".to_string(),
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
                    product_id: ProductId::new(),
                    product_name: "Pump impeller".to_string(),
                    quantity: 2,
                    price: 10_000,
                }],
                tax_rate: TaxRate::from_bps(1300).unwrap(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order
    }

    #[test]
    fn formats_cents_as_dollars() {
        assert_eq!(format_cents(22_600), "$226.00");
        assert_eq!(format_cents(7), "$0.07");
    }

    #[test]
    fn success_message_lists_items_and_totals() {
        let n = render_success(&placed_order(), "owner@example.com");
        assert_eq!(n.recipient, "owner@example.com");
        assert!(n.subject.contains("RES004211"));
        assert!(n.body.contains("Pump impeller x2 @ $100.00 = $200.00"));
        assert!(n.body.contains("Tax: $26.00"));
        assert!(n.body.contains("Total: $226.00"));
        assert!(n.body.contains("12 Harbour St, Unit 4"));
    }

    #[test]
    fn failure_subject_reflects_reason() {
        let order = placed_order();
        let cancelled = render_failure(&order, "o@example.com", "Payment cancelled: abandoned");
        assert!(cancelled.subject.contains("CANCELLED"));
        let expired = render_failure(&order, "o@example.com", "Payment session expired");
        assert!(expired.subject.contains("EXPIRED"));
        let declined = render_failure(&order, "o@example.com", "Card declined");
        assert!(declined.subject.contains("FAILED"));
        assert!(declined.body.contains("Reason: Card declined"));
    }

    #[tokio::test]
    async fn success_sends_customer_confirmation_when_enabled() {
        let sink = Arc::new(InMemoryNotifier::new());
        let notifier = Notifier::new(sink.clone(), "o@example.com", true, Duration::from_secs(1));
        notifier.notify_success(&placed_order()).await;

        assert_eq!(sink.count(NotificationKind::PaymentSucceeded), 1);
        let sent = sink.sent();
        let confirmation = sent
            .iter()
            .find(|n| n.kind == NotificationKind::CustomerConfirmation)
            .unwrap();
        assert_eq!(confirmation.recipient, "buyer@example.com");
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let sink = Arc::new(InMemoryNotifier::new());
        sink.set_failing(true);
        let notifier = Notifier::new(sink.clone(), "o@example.com", false, Duration::from_secs(1));
        notifier.notify_failure(&placed_order(), "Card declined").await;
        assert!(sink.sent().is_empty());
    }

    struct StalledDispatcher;

    #[async_trait]
    impl NotificationDispatcher for StalledDispatcher {
        async fn deliver(&self, _notification: &Notification) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stalled_dispatcher_is_cut_off_by_timeout() {
        let notifier = Notifier::new(
            Arc::new(StalledDispatcher),
            "o@example.com",
            false,
            Duration::from_millis(20),
        );
        let started = std::time::Instant::now();
        notifier.notify_success(&placed_order()).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
