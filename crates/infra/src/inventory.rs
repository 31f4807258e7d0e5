//! Inventory Decrement Engine port.

use async_trait::async_trait;
use thiserror::Error;

use storefront_core::OrderId;
use storefront_inventory::{DecrementLine, DecrementOutcome};
use storefront_orders::Order;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("inventory storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait InventoryEngine: Send + Sync {
    /// Take the order's quantities out of stock, at most once per order.
    ///
    /// The "already decremented" check and the stock writes are one atomic
    /// step, so racing callers for the same order decrement once in total.
    /// Stock stops at zero; shortfalls are reported, never an error.
    async fn decrement_for_order(
        &self,
        order_id: OrderId,
        lines: &[DecrementLine],
    ) -> Result<DecrementOutcome, InventoryError>;
}

pub fn lines_for_order(order: &Order) -> Vec<DecrementLine> {
    order
        .items()
        .iter()
        .map(|item| DecrementLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect()
}
