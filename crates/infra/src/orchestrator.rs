//! Payment Orchestrator.
//!
//! Turns a checkout submission into a placed order and creates external
//! payment references for it. Every path that is about to create processor
//! state re-verifies items against the catalog first, and nothing is written
//! to the ledger until the processor call has succeeded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use storefront_cart::{CartLine, CartValidation, Quote, QuoteLine, merge_lines};
use storefront_catalog::{AvailabilityIssue, ProductLookup, verify_purchase};
use storefront_core::{Aggregate, Cents, OrderId, ProductId};
use storefront_orders::{
    Address, AttachReference, Customer, Order, OrderCommand, OrderItem, PaymentReference,
    PaymentStatus, PlaceOrder, ReferenceKind,
};
use storefront_payments::{
    IntentRequest, Metadata, PaymentProcessor, ProcessorError, SessionLineItem, SessionRequest,
};

use crate::catalog::CatalogStore;
use crate::config::Settings;
use crate::error::CheckoutError;
use crate::ledger::{LedgerError, OrderLedger};

/// Payment method that gets a direct payment reference at order creation.
pub const CARD_PAYMENT_METHOD: &str = "card";

const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Checkout submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer: Customer,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub payment_method: String,
    #[serde(default)]
    pub shipping_method: String,
    pub items: Vec<QuoteLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    pub order: Order,
    /// Present when a direct payment reference was created.
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub order_id: OrderId,
    pub session_id: String,
    pub url: String,
}

/// Run a processor call under `timeout`; elapsing counts as a processor error.
pub async fn call_processor<T, F>(timeout: Duration, call: F) -> Result<T, ProcessorError>
where
    F: Future<Output = Result<T, ProcessorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProcessorError::Timeout),
    }
}

fn new_order_number() -> String {
    format!("RES{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

fn new_confirmation_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Re-check each `(product, quantity, price)` against the lookup.
fn verify_lines<L>(
    lookup: &L,
    lines: impl IntoIterator<Item = (ProductId, u32, Option<Cents>)>,
) -> Result<Vec<OrderItem>, CheckoutError>
where
    L: ProductLookup + ?Sized,
{
    let mut items = Vec::new();
    let mut issues: Vec<AvailabilityIssue> = Vec::new();
    for (product_id, quantity, price) in lines {
        match verify_purchase(lookup, product_id, quantity, price) {
            Ok(product) => items.push(OrderItem {
                product_id,
                product_name: product.name.clone(),
                quantity,
                price: product.price,
            }),
            Err(issue) => issues.push(issue),
        }
    }
    if !issues.is_empty() {
        return Err(CheckoutError::Availability(issues));
    }
    Ok(items)
}

fn intent_metadata(order: &Order) -> Metadata {
    let customer = order.customer();
    let mut metadata = Metadata::new();
    metadata.insert("order_id".to_string(), order.id_typed().to_string());
    metadata.insert("order_number".to_string(), order.order_number().to_string());
    metadata.insert("customer_email".to_string(), customer.email.clone());
    metadata.insert("customer_name".to_string(), customer.full_name());
    metadata.insert("subtotal".to_string(), order.subtotal().to_string());
    metadata.insert("tax_amount".to_string(), order.tax_amount().to_string());
    metadata.insert("items_count".to_string(), order.items().len().to_string());
    for (n, item) in order.items().iter().enumerate() {
        let n = n + 1;
        metadata.insert(format!("item_{n}_name"), item.product_name.clone());
        metadata.insert(format!("item_{n}_id"), item.product_id.to_string());
        metadata.insert(format!("item_{n}_quantity"), item.quantity.to_string());
        metadata.insert(format!("item_{n}_price"), item.price.to_string());
    }
    metadata
}

fn session_metadata(order: &Order) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("order_id".to_string(), order.id_typed().to_string());
    metadata.insert("order_number".to_string(), order.order_number().to_string());
    metadata.insert(
        "confirmation_token".to_string(),
        order.confirmation_token().to_string(),
    );
    metadata
}

fn ensure_unpaid(order: &Order) -> Result<(), CheckoutError> {
    if order.payment_status() == PaymentStatus::Completed {
        return Err(CheckoutError::Conflict(format!(
            "order {} is already paid",
            order.order_number()
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    ledger: Arc<dyn OrderLedger>,
    catalog: Arc<dyn CatalogStore>,
    processor: Arc<dyn PaymentProcessor>,
    settings: Arc<Settings>,
}

impl core::fmt::Debug for PaymentOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PaymentOrchestrator")
            .field("currency", &self.settings.currency)
            .field("tax_rate", &self.settings.tax_rate)
            .finish_non_exhaustive()
    }
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        catalog: Arc<dyn CatalogStore>,
        processor: Arc<dyn PaymentProcessor>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            processor,
            settings,
        }
    }

    /// Advisory cart clean-up against current catalog data.
    pub async fn validate_cart(&self, lines: &[CartLine]) -> Result<CartValidation, CheckoutError> {
        let ids: Vec<ProductId> = lines.iter().map(|l| l.product_id).collect();
        let snapshot = self.catalog.snapshot(&ids).await?;
        Ok(storefront_cart::validate_cart(&snapshot, lines))
    }

    /// Advisory authoritative totals.
    pub async fn quote(&self, lines: &[QuoteLine]) -> Result<Quote, CheckoutError> {
        let ids: Vec<ProductId> = lines.iter().map(|l| l.product_id).collect();
        let snapshot = self.catalog.snapshot(&ids).await?;
        Ok(storefront_cart::calculate_order_total(
            &snapshot,
            lines,
            self.settings.tax_rate,
        ))
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, CheckoutError> {
        self.ledger
            .get(order_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("order {order_id}")))
    }

    /// Place an order from a checkout submission.
    ///
    /// Items are re-verified (availability, quantity, submitted price) and
    /// priced from the catalog. Card orders get a direct payment reference
    /// before the order is stored; a processor failure stores nothing.
    #[instrument(skip(self, request), fields(payment_method = %request.payment_method), err)]
    pub async fn place_order(&self, request: NewOrder) -> Result<PlacedOrder, CheckoutError> {
        if request.items.is_empty() {
            return Err(CheckoutError::validation("order must contain at least one item"));
        }
        if request.items.iter().any(|l| l.quantity == 0) {
            return Err(CheckoutError::validation("item quantity must be positive"));
        }

        let lines = merge_lines(request.items.iter().copied());
        let ids: Vec<ProductId> = lines.iter().map(|l| l.product_id).collect();
        let snapshot = self.catalog.snapshot(&ids).await?;
        let items = verify_lines(
            &snapshot,
            lines.iter().map(|l| (l.product_id, l.quantity, l.price)),
        )?;

        let mut last_conflict = None;
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let order_id = OrderId::new();
            let mut order = Order::empty(order_id);
            order.execute(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                order_number: new_order_number(),
                confirmation_token: new_confirmation_token(),
                customer: request.customer.clone(),
                billing_address: request.billing_address.clone(),
                shipping_address: request.shipping_address.clone(),
                payment_method: request.payment_method.clone(),
                shipping_method: request.shipping_method.clone(),
                items: items.clone(),
                tax_rate: self.settings.tax_rate,
                occurred_at: Utc::now(),
            }))?;

            let client_secret = if request.payment_method == CARD_PAYMENT_METHOD {
                Some(self.attach_intent(&mut order).await?)
            } else {
                None
            };

            match self.ledger.insert(&order).await {
                Ok(()) => {
                    info!(
                        order_id = %order.id_typed(),
                        order_number = %order.order_number(),
                        total = order.total_amount(),
                        "order placed"
                    );
                    return Ok(PlacedOrder {
                        order,
                        client_secret,
                    });
                }
                // Order number collision; the intent created for it is left to expire.
                Err(LedgerError::Duplicate(msg)) => {
                    warn!(order_number = %order.order_number(), %msg, "order number taken, retrying");
                    last_conflict = Some(msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CheckoutError::Conflict(last_conflict.unwrap_or_else(|| {
            "could not allocate an order number".to_string()
        })))
    }

    async fn attach_intent(&self, order: &mut Order) -> Result<String, CheckoutError> {
        let request = IntentRequest {
            amount: order.total_amount(),
            currency: self.settings.currency.clone(),
            description: format!("Order {}", order.order_number()),
            receipt_email: Some(order.customer().email.clone()),
            metadata: intent_metadata(order),
        };
        let intent = call_processor(
            self.settings.processor_timeout,
            self.processor.create_intent(request),
        )
        .await?;

        order.execute(&OrderCommand::AttachReference(AttachReference {
            order_id: order.id_typed(),
            reference: PaymentReference {
                kind: ReferenceKind::Intent,
                id: intent.id,
                created_at: Utc::now(),
            },
            occurred_at: Utc::now(),
        }))?;
        Ok(intent.client_secret)
    }

    /// Create a hosted-session reference and make it the order's current one.
    ///
    /// The processor call runs without the order lock; the lock is taken only
    /// to attach the new reference, after re-checking the order is unpaid.
    /// When two requests race, the later attach wins and becomes current.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn create_checkout_session(
        &self,
        order_id: OrderId,
    ) -> Result<CheckoutSession, CheckoutError> {
        let order = self.get_order(order_id).await?;
        ensure_unpaid(&order)?;

        let ids: Vec<ProductId> = order.items().iter().map(|i| i.product_id).collect();
        let snapshot = self.catalog.snapshot(&ids).await?;
        verify_lines(
            &snapshot,
            order
                .items()
                .iter()
                .map(|i| (i.product_id, i.quantity, Some(i.price))),
        )?;

        let mut line_items: Vec<SessionLineItem> = order
            .items()
            .iter()
            .map(|i| SessionLineItem {
                name: i.product_name.clone(),
                unit_amount: i.price,
                quantity: i.quantity,
            })
            .collect();
        if order.tax_amount() > 0 {
            line_items.push(SessionLineItem {
                name: format!("Tax ({}%)", self.tax_percent()),
                unit_amount: order.tax_amount(),
                quantity: 1,
            });
        }

        let token = order.confirmation_token().to_string();
        let request = SessionRequest {
            currency: self.settings.currency.clone(),
            line_items,
            customer_email: Some(order.customer().email.clone()),
            success_url: format!(
                "{}?session_id={{CHECKOUT_SESSION_ID}}&token={token}",
                self.settings.checkout_success_url
            ),
            cancel_url: format!("{}?token={token}", self.settings.checkout_cancel_url),
            metadata: session_metadata(&order),
        };
        let session = call_processor(
            self.settings.processor_timeout,
            self.processor.create_hosted_session(request),
        )
        .await?;

        let lock = self.ledger.lock(order_id).await?;
        let mut order = lock.order().clone();
        ensure_unpaid(&order)?;
        order.execute(&OrderCommand::AttachReference(AttachReference {
            order_id,
            reference: PaymentReference {
                kind: ReferenceKind::Session,
                id: session.id.clone(),
                created_at: Utc::now(),
            },
            occurred_at: Utc::now(),
        }))?;
        lock.commit(&order).await?;

        info!(order_id = %order_id, session_id = %session.id, "checkout session created");
        Ok(CheckoutSession {
            order_id,
            session_id: session.id,
            url: session.url,
        })
    }

    fn tax_percent(&self) -> String {
        let bps = self.settings.tax_rate.bps();
        if bps % 100 == 0 {
            (bps / 100).to_string()
        } else {
            format!("{}.{:02}", bps / 100, bps % 100)
        }
    }
}
