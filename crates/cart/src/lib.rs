//! Cart validation and quoting.
//!
//! Both operations are advisory and side-effect free: they clean a
//! client-submitted cart against authoritative catalog data and compute
//! totals from authoritative prices. Nothing here reserves stock; the
//! payment orchestrator re-verifies everything before money changes hands.

pub mod quote;
pub mod validate;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use storefront_core::ProductId;

pub use quote::{Quote, QuoteIssues, QuoteLine, QuotedItem, calculate_order_total};
pub use validate::{
    CartValidation, RemovedItem, UpdatedItem, ValidCartItem, validate_cart,
};

/// A line as submitted by a client cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A line that names a product and a quantity of it.
pub trait ProductLine {
    fn product_id(&self) -> ProductId;
    fn add_quantity(&mut self, quantity: u32);
    fn quantity(&self) -> u32;
}

impl ProductLine for CartLine {
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

/// Collapse repeated products into one line, keeping first-seen order.
///
/// The first line for a product keeps its other fields (e.g. a submitted
/// price); later lines only add their quantity.
pub fn merge_lines<T, I>(lines: I) -> Vec<T>
where
    T: ProductLine,
    I: IntoIterator<Item = T>,
{
    let mut index: HashMap<ProductId, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::new();
    for line in lines {
        match index.get(&line.product_id()) {
            Some(&i) => out[i].add_quantity(line.quantity()),
            None => {
                index.insert(line.product_id(), out.len());
                out.push(line);
            }
        }
    }
    out
}
