use serde::{Deserialize, Serialize};

use storefront_core::{Cents, ProductId};

/// Authoritative, server-side product state as seen by checkout.
///
/// The catalog owns this record; checkout only reads it, and only the
/// inventory decrement engine writes `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in smallest currency unit (e.g., cents).
    pub price: Cents,
    /// Units on hand. Never negative.
    pub quantity: u32,
    pub active: bool,
}

/// Why a product cannot be sold right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NotFound,
    Inactive,
    OutOfStock,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::NotFound => "not_found",
            UnavailableReason::Inactive => "inactive",
            UnavailableReason::OutOfStock => "out_of_stock",
        }
    }
}

impl core::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of asking the gate about a single product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available { price: Cents, quantity: u32 },
    Unavailable(UnavailableReason),
}

impl Product {
    /// "Available" means active with at least one unit on hand.
    pub fn is_available(&self) -> bool {
        self.active && self.quantity > 0
    }

    pub fn availability(&self) -> Availability {
        if !self.active {
            Availability::Unavailable(UnavailableReason::Inactive)
        } else if self.quantity == 0 {
            Availability::Unavailable(UnavailableReason::OutOfStock)
        } else {
            Availability::Available {
                price: self.price,
                quantity: self.quantity,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(quantity: u32, active: bool) -> Product {
        Product {
            id: ProductId::new(),
            name: "Mechanical seal".to_string(),
            description: String::new(),
            price: 10_000,
            quantity,
            active,
        }
    }

    #[test]
    fn active_product_with_stock_is_available() {
        let p = product(5, true);
        assert!(p.is_available());
        assert_eq!(
            p.availability(),
            Availability::Available {
                price: 10_000,
                quantity: 5
            }
        );
    }

    #[test]
    fn inactive_wins_over_out_of_stock() {
        let p = product(0, false);
        assert!(!p.is_available());
        assert_eq!(
            p.availability(),
            Availability::Unavailable(UnavailableReason::Inactive)
        );
    }

    #[test]
    fn zero_quantity_is_out_of_stock() {
        let p = product(0, true);
        assert_eq!(
            p.availability(),
            Availability::Unavailable(UnavailableReason::OutOfStock)
        );
    }

    #[test]
    fn reason_serializes_as_snake_case() {
        assert_eq!(UnavailableReason::OutOfStock.as_str(), "out_of_stock");
        assert_eq!(UnavailableReason::NotFound.to_string(), "not_found");
    }
}
