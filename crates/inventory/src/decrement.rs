use serde::{Deserialize, Serialize};

use storefront_cart::{ProductLine, merge_lines};
use storefront_core::{OrderId, ProductId};

/// Quantity to take out of stock for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecrementLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ProductLine for DecrementLine {
    fn product_id(&self) -> ProductId {
        self.product_id
    }

    fn add_quantity(&mut self, quantity: u32) {
        self.quantity = self.quantity.saturating_add(quantity);
    }

    fn quantity(&self) -> u32 {
        self.quantity
    }
}

/// Result of decrementing one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub product_id: ProductId,
    pub requested: u32,
    pub before: u32,
    pub after: u32,
}

impl StockChange {
    /// Units that could not be taken because stock ran out.
    pub fn shortfall(&self) -> u32 {
        self.requested - (self.before - self.after)
    }
}

/// Everything that happened to stock for one order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecrementReport {
    pub changes: Vec<StockChange>,
    /// Products that no longer exist in the catalog.
    pub missing: Vec<ProductId>,
}

impl DecrementReport {
    pub fn has_shortfall(&self) -> bool {
        !self.missing.is_empty() || self.changes.iter().any(|c| c.shortfall() > 0)
    }

    pub fn shortfalls(&self) -> impl Iterator<Item = &StockChange> {
        self.changes.iter().filter(|c| c.shortfall() > 0)
    }
}

/// Outcome of a keyed decrement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecrementOutcome {
    Applied {
        order_id: OrderId,
        report: DecrementReport,
    },
    /// The order was already decremented; nothing changed.
    AlreadyApplied { order_id: OrderId },
}

impl DecrementOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(self, DecrementOutcome::Applied { .. })
    }
}

/// Subtract `requested` from `stock`, stopping at zero.
pub fn decrement_stock(product_id: ProductId, stock: u32, requested: u32) -> StockChange {
    StockChange {
        product_id,
        requested,
        before: stock,
        after: stock.saturating_sub(requested),
    }
}

/// Compute every stock change for an order from current stock levels.
///
/// `current` returns `None` for products that no longer exist. The caller
/// writes `after` back for each change inside its own atomic section.
pub fn plan_decrement<F>(lines: &[DecrementLine], mut current: F) -> DecrementReport
where
    F: FnMut(&ProductId) -> Option<u32>,
{
    let mut report = DecrementReport::default();
    for line in merge_lines(lines.iter().copied()) {
        match current(&line.product_id) {
            Some(stock) => report
                .changes
                .push(decrement_stock(line.product_id, stock, line.quantity)),
            None => report.missing.push(line.product_id),
        }
    }
    report
}
