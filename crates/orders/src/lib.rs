//! Orders domain module.
//!
//! Business rules for orders and their payment lifecycle, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage). The
//! reconciliation rules that make payment confirmation idempotent and
//! order-insensitive live on the [`Order`] aggregate.

pub mod order;
pub mod payment;

pub use order::{
    Address, AttachReference, ApplyOutcome, Customer, Order, OrderCommand, OrderEvent, OrderItem,
    OrderPlaced, OrderStatus, PaymentFailed, PaymentProcessing, PaymentSucceeded, PlaceOrder,
    ReferenceAttached, is_valid_order_number,
};
pub use payment::{
    Assessment, Channel, FailureDisposition, FailureRecord, PaymentReference, PaymentStatus,
    ReconciliationOutcome, ReferenceKind, ResolvedState,
};
