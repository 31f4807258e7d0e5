use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{
    Aggregate, AggregateRoot, Cents, DomainError, OrderId, ProductId, TaxRate,
};

use crate::payment::{
    Assessment, FailureDisposition, FailureRecord, PaymentReference, PaymentStatus,
    ReconciliationOutcome, ResolvedState,
};

/// Fulfillment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    fn validate(&self, label: &str) -> Result<(), DomainError> {
        for (field, value) in [
            ("line1", &self.line1),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "{label} address {field} is required"
                )));
            }
        }
        Ok(())
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.line1)?;
        if let Some(line2) = self.line2.as_deref().filter(|l| !l.is_empty()) {
            write!(f, ", {line2}")?;
        }
        write!(
            f,
            ", {}, {} {}, {}",
            self.city, self.state, self.postal_code, self.country
        )
    }
}

/// Order line with the price snapshotted at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// Authoritative unit price when the order was placed.
    pub price: Cents,
}

impl OrderItem {
    pub fn line_total(&self) -> Cents {
        self.price * Cents::from(self.quantity)
    }
}

/// `RES` followed by six digits.
pub fn is_valid_order_number(value: &str) -> bool {
    value
        .strip_prefix("RES")
        .is_some_and(|digits| digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    confirmation_token: String,
    customer: Customer,
    billing_address: Address,
    shipping_address: Address,
    payment_method: String,
    shipping_method: String,
    items: Vec<OrderItem>,
    subtotal: Cents,
    tax_amount: Cents,
    total_amount: Cents,
    status: OrderStatus,
    payment_status: PaymentStatus,
    current_reference: Option<PaymentReference>,
    last_failure: Option<FailureRecord>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        let blank_address = Address {
            line1: String::new(),
            line2: None,
            city: String::new(),
            state: String::new(),
            postal_code: String::new(),
            country: String::new(),
        };
        Self {
            id,
            order_number: String::new(),
            confirmation_token: String::new(),
            customer: Customer {
                email: String::new(),
                first_name: String::new(),
                last_name: String::new(),
                phone: None,
            },
            billing_address: blank_address.clone(),
            shipping_address: blank_address,
            payment_method: String::new(),
            shipping_method: String::new(),
            items: Vec::new(),
            subtotal: 0,
            tax_amount: 0,
            total_amount: 0,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            current_reference: None,
            last_failure: None,
            created_at: None,
            updated_at: None,
            paid_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn confirmation_token(&self) -> &str {
        &self.confirmation_token
    }

    pub fn customer(&self) -> &Customer {
        &self.customer
    }

    pub fn billing_address(&self) -> &Address {
        &self.billing_address
    }

    pub fn shipping_address(&self) -> &Address {
        &self.shipping_address
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn shipping_method(&self) -> &str {
        &self.shipping_method
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Cents {
        self.subtotal
    }

    pub fn tax_amount(&self) -> Cents {
        self.tax_amount
    }

    pub fn total_amount(&self) -> Cents {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn current_reference(&self) -> Option<&PaymentReference> {
        self.current_reference.as_ref()
    }

    pub fn last_failure(&self) -> Option<&FailureRecord> {
        self.last_failure.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    /// Whether `reference_id` is the reference reconciliation listens to.
    pub fn is_current_reference(&self, reference_id: &str) -> bool {
        self.current_reference
            .as_ref()
            .is_some_and(|r| r.id == reference_id)
    }

    /// Classify an outcome against the current state without touching it.
    ///
    /// Completed absorbs everything. Success wins over an earlier failure of
    /// the same reference. Identical failures and pending signals never
    /// produce a second transition.
    pub fn assess(&self, outcome: &ReconciliationOutcome) -> Assessment {
        if self.payment_status == PaymentStatus::Completed {
            return Assessment::AlreadyCompleted;
        }
        if !self.is_current_reference(&outcome.reference_id) {
            return Assessment::Superseded {
                current: self.current_reference.as_ref().map(|r| r.id.clone()),
            };
        }

        match &outcome.state {
            ResolvedState::Succeeded => Assessment::Complete,
            ResolvedState::Failed {
                reason,
                disposition,
            } => {
                let duplicate = self.last_failure.as_ref().is_some_and(|f| {
                    f.reference_id == outcome.reference_id && &f.reason == reason
                });
                if duplicate {
                    Assessment::DuplicateFailure
                } else {
                    Assessment::Fail {
                        reason: reason.clone(),
                        disposition: *disposition,
                    }
                }
            }
            ResolvedState::Processing if self.payment_status == PaymentStatus::Pending => {
                Assessment::MarkProcessing
            }
            ResolvedState::Processing | ResolvedState::Pending => Assessment::Informational,
        }
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
///
/// Item prices must already be the authoritative ones; totals are derived here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: String,
    pub confirmation_token: String,
    pub customer: Customer,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub payment_method: String,
    pub shipping_method: String,
    pub items: Vec<OrderItem>,
    pub tax_rate: TaxRate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachReference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachReference {
    pub order_id: OrderId,
    pub reference: PaymentReference,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyOutcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub outcome: ReconciliationOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AttachReference(AttachReference),
    ApplyOutcome(ApplyOutcome),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: String,
    pub confirmation_token: String,
    pub customer: Customer,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub payment_method: String,
    pub shipping_method: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Cents,
    pub tax_amount: Cents,
    pub total_amount: Cents,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReferenceAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAttached {
    pub order_id: OrderId,
    pub reference: PaymentReference,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentProcessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProcessing {
    pub order_id: OrderId,
    pub reference_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentSucceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub order_id: OrderId,
    pub reference_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: OrderId,
    pub reference_id: String,
    pub reason: String,
    pub disposition: FailureDisposition,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    ReferenceAttached(ReferenceAttached),
    PaymentProcessing(PaymentProcessing),
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed(PaymentFailed),
}

impl OrderEvent {
    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::ReferenceAttached(e) => e.occurred_at,
            OrderEvent::PaymentProcessing(e) => e.occurred_at,
            OrderEvent::PaymentSucceeded(e) => e.occurred_at,
            OrderEvent::PaymentFailed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_number = e.order_number.clone();
                self.confirmation_token = e.confirmation_token.clone();
                self.customer = e.customer.clone();
                self.billing_address = e.billing_address.clone();
                self.shipping_address = e.shipping_address.clone();
                self.payment_method = e.payment_method.clone();
                self.shipping_method = e.shipping_method.clone();
                self.items = e.items.clone();
                self.subtotal = e.subtotal;
                self.tax_amount = e.tax_amount;
                self.total_amount = e.total_amount;
                self.status = OrderStatus::Pending;
                self.payment_status = PaymentStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::ReferenceAttached(e) => {
                self.current_reference = Some(e.reference.clone());
                self.payment_status = PaymentStatus::Pending;
                self.last_failure = None;
            }
            OrderEvent::PaymentProcessing(_) => {
                self.payment_status = PaymentStatus::Processing;
            }
            OrderEvent::PaymentSucceeded(e) => {
                self.payment_status = PaymentStatus::Completed;
                self.status = OrderStatus::Processing;
                self.last_failure = None;
                self.paid_at = Some(e.occurred_at);
            }
            OrderEvent::PaymentFailed(e) => {
                self.payment_status = match e.disposition {
                    FailureDisposition::Terminal => PaymentStatus::Failed,
                    FailureDisposition::AwaitingRetry => PaymentStatus::Pending,
                };
                self.last_failure = Some(FailureRecord {
                    reference_id: e.reference_id.clone(),
                    reason: e.reason.clone(),
                });
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AttachReference(cmd) => self.handle_attach_reference(cmd),
            OrderCommand::ApplyOutcome(cmd) => self.handle_apply_outcome(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if !is_valid_order_number(&cmd.order_number) {
            return Err(DomainError::validation("order_number must be RES followed by 6 digits"));
        }
        if cmd.confirmation_token.is_empty() {
            return Err(DomainError::validation("confirmation_token is required"));
        }
        if !cmd.customer.email.contains('@') {
            return Err(DomainError::validation("customer email is invalid"));
        }
        if cmd.customer.first_name.trim().is_empty() || cmd.customer.last_name.trim().is_empty() {
            return Err(DomainError::validation("customer name is required"));
        }
        cmd.billing_address.validate("billing")?;
        cmd.shipping_address.validate("shipping")?;

        if cmd.items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        if cmd.items.iter().any(|i| i.quantity == 0) {
            return Err(DomainError::validation("item quantity must be positive"));
        }

        let subtotal = cmd
            .items
            .iter()
            .try_fold(0u64, |acc, item| {
                item.price
                    .checked_mul(Cents::from(item.quantity))
                    .and_then(|line| acc.checked_add(line))
            })
            .ok_or_else(|| DomainError::validation("order total overflows"))?;
        let tax_amount = cmd.tax_rate.tax_on(subtotal);
        let total_amount = subtotal
            .checked_add(tax_amount)
            .ok_or_else(|| DomainError::validation("order total overflows"))?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            confirmation_token: cmd.confirmation_token.clone(),
            customer: cmd.customer.clone(),
            billing_address: cmd.billing_address.clone(),
            shipping_address: cmd.shipping_address.clone(),
            payment_method: cmd.payment_method.clone(),
            shipping_method: cmd.shipping_method.clone(),
            items: cmd.items.clone(),
            subtotal,
            tax_amount,
            total_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_reference(
        &self,
        cmd: &AttachReference,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        if self.payment_status == PaymentStatus::Completed {
            return Err(DomainError::conflict("order payment is already completed"));
        }
        if cmd.reference.id.is_empty() {
            return Err(DomainError::validation("reference id is required"));
        }
        if self.is_current_reference(&cmd.reference.id) {
            return Ok(Vec::new());
        }

        Ok(vec![OrderEvent::ReferenceAttached(ReferenceAttached {
            order_id: cmd.order_id,
            reference: cmd.reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_outcome(&self, cmd: &ApplyOutcome) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        let outcome = &cmd.outcome;
        self.ensure_order_id(outcome.order_id)?;

        let event = match self.assess(outcome) {
            Assessment::Superseded { .. } => {
                return Err(DomainError::conflict(format!(
                    "reference {} is not the current payment reference",
                    outcome.reference_id
                )));
            }
            Assessment::AlreadyCompleted
            | Assessment::DuplicateFailure
            | Assessment::Informational => return Ok(Vec::new()),
            Assessment::Complete => OrderEvent::PaymentSucceeded(PaymentSucceeded {
                order_id: outcome.order_id,
                reference_id: outcome.reference_id.clone(),
                occurred_at: cmd.occurred_at,
            }),
            Assessment::Fail {
                reason,
                disposition,
            } => OrderEvent::PaymentFailed(PaymentFailed {
                order_id: outcome.order_id,
                reference_id: outcome.reference_id.clone(),
                reason,
                disposition,
                occurred_at: cmd.occurred_at,
            }),
            Assessment::MarkProcessing => OrderEvent::PaymentProcessing(PaymentProcessing {
                order_id: outcome.order_id,
                reference_id: outcome.reference_id.clone(),
                occurred_at: cmd.occurred_at,
            }),
        };

        Ok(vec![event])
    }
}
