use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_cart::{CartLine, QuoteLine};
use storefront_core::{Cents, OrderId};
use storefront_infra::{ChannelReport, Disposition};
use storefront_orders::{
    Address, Customer, Order, OrderItem, OrderStatus, PaymentStatus, ReferenceKind,
    ResolvedState,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ValidateCartRequest {
    pub items: Vec<CartLine>,
}

#[derive(Debug, Deserialize)]
pub struct CalculateTotalRequest {
    pub items: Vec<QuoteLine>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub reference_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCheckoutSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentCancelledRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct PaymentReferenceView {
    pub kind: ReferenceKind,
    pub id: String,
}

/// Public shape of an order. The confirmation token stays server-side.
#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub customer: Customer,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub payment_method: String,
    pub shipping_method: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Cents,
    pub tax_amount: Cents,
    pub total_amount: Cents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<PaymentReferenceView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id_typed(),
            order_number: order.order_number().to_string(),
            status: order.status(),
            payment_status: order.payment_status(),
            customer: order.customer().clone(),
            billing_address: order.billing_address().clone(),
            shipping_address: order.shipping_address().clone(),
            payment_method: order.payment_method().to_string(),
            shipping_method: order.shipping_method().to_string(),
            items: order.items().to_vec(),
            subtotal: order.subtotal(),
            tax_amount: order.tax_amount(),
            total_amount: order.total_amount(),
            payment_reference: order.current_reference().map(|r| PaymentReferenceView {
                kind: r.kind,
                id: r.id.clone(),
            }),
            failure_reason: order.last_failure().map(|f| f.reason.clone()),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
            paid_at: order.paid_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order: OrderView,
    /// Handed to the client-side payment form; never stored on the order view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub checkout_session_id: String,
    pub url: String,
}

/// Result of a confirm or session-poll request.
#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub verified: bool,
    pub resolved_state: &'static str,
    pub disposition: Disposition,
    pub order: OrderView,
}

impl From<ChannelReport> for ChannelResponse {
    fn from(report: ChannelReport) -> Self {
        Self {
            verified: report.state == ResolvedState::Succeeded,
            resolved_state: report.state.label(),
            disposition: report.disposition,
            order: OrderView::from(&report.order),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentCancelledResponse {
    pub notified: bool,
}
