//! Order Ledger: persistent record of orders and their payment state.
//!
//! Writers take a per-order lock ([`OrderLedger::lock`]), decide on the
//! locked snapshot, and [`OrderLock::commit`] the new state. Dropping a lock
//! without committing releases it and discards nothing but the lock itself.
//! No lock spans more than one order.

use async_trait::async_trait;
use thiserror::Error;

use storefront_core::{AggregateRoot, OrderId};
use storefront_orders::Order;

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryOrderLedger;
#[cfg(feature = "postgres")]
pub use postgres::PostgresOrderLedger;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("order not found: {0}")]
    NotFound(OrderId),

    #[error("duplicate order: {0}")]
    Duplicate(String),

    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Check that `order` descends from the `locked` snapshot.
///
/// Returns whether any event was applied since the lock was taken.
fn check_descends(locked: &Order, order: &Order) -> Result<bool, LedgerError> {
    if order.id_typed() != locked.id_typed() {
        return Err(LedgerError::Concurrency(format!(
            "commit for order {} under the lock of order {}",
            order.id_typed(),
            locked.id_typed()
        )));
    }
    if order.version() < locked.version() {
        return Err(LedgerError::Concurrency(format!(
            "commit would move order {} back from version {} to {}",
            order.id_typed(),
            locked.version(),
            order.version()
        )));
    }
    Ok(order.version() > locked.version())
}

/// Exclusive hold on one order until committed or dropped.
#[async_trait]
pub trait OrderLock: Send {
    /// Order state as of acquiring the lock.
    fn order(&self) -> &Order;

    /// Persist `order` and release the lock.
    ///
    /// `order` must be the locked order with zero or more events applied.
    async fn commit(self: Box<Self>, order: &Order) -> Result<(), LedgerError>;
}

#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Store a newly placed order, indexing its current reference if any.
    async fn insert(&self, order: &Order) -> Result<(), LedgerError>;

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, LedgerError>;

    /// Order a payment reference was ever attached to.
    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<OrderId>, LedgerError>;

    /// Wait for exclusive access to one order.
    async fn lock(&self, order_id: OrderId) -> Result<Box<dyn OrderLock>, LedgerError>;
}
