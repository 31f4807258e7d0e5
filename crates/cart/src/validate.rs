use serde::{Deserialize, Serialize};

use storefront_catalog::{Availability, ProductLookup, UnavailableReason};
use storefront_core::{Cents, ProductId};

use crate::{CartLine, merge_lines};

/// A line that survived validation, carrying the authoritative price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidCartItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub price: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedItem {
    pub product_id: ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub reason: UnavailableReason,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedItem {
    pub product_id: ProductId,
    pub name: String,
    pub original_quantity: u32,
    pub adjusted_quantity: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartValidation {
    pub valid_cart_items: Vec<ValidCartItem>,
    pub removed_items: Vec<RemovedItem>,
    pub updated_items: Vec<UpdatedItem>,
    pub cart_changed: bool,
}

/// Clean a client cart against the catalog.
///
/// Missing or unsellable products are removed, quantities are clamped to
/// stock on hand, and prices always come from the catalog. Lines asking for
/// zero units are dropped.
pub fn validate_cart<L>(lookup: &L, lines: &[CartLine]) -> CartValidation
where
    L: ProductLookup + ?Sized,
{
    let lines = merge_lines(lines.iter().copied());

    let mut out = CartValidation::default();
    let mut dropped_empty = false;

    for line in lines {
        if line.quantity == 0 {
            dropped_empty = true;
            continue;
        }
        let Some(product) = lookup.product(&line.product_id) else {
            out.removed_items.push(RemovedItem {
                product_id: line.product_id,
                name: None,
                reason: UnavailableReason::NotFound,
                message: "Product no longer exists".to_string(),
            });
            continue;
        };

        match product.availability() {
            Availability::Unavailable(reason) => {
                let message = match reason {
                    UnavailableReason::OutOfStock => format!("{} is out of stock", product.name),
                    _ => format!("{} is no longer available", product.name),
                };
                out.removed_items.push(RemovedItem {
                    product_id: line.product_id,
                    name: Some(product.name.clone()),
                    reason,
                    message,
                });
            }
            Availability::Available { price, quantity } => {
                let adjusted = line.quantity.min(quantity);
                if adjusted != line.quantity {
                    out.updated_items.push(UpdatedItem {
                        product_id: line.product_id,
                        name: product.name.clone(),
                        original_quantity: line.quantity,
                        adjusted_quantity: adjusted,
                        message: format!(
                            "Only {quantity} units of {} are available; quantity adjusted",
                            product.name
                        ),
                    });
                }
                out.valid_cart_items.push(ValidCartItem {
                    product_id: line.product_id,
                    name: product.name.clone(),
                    quantity: adjusted,
                    price,
                });
            }
        }
    }

    out.cart_changed =
        dropped_empty || !out.removed_items.is_empty() || !out.updated_items.is_empty();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_catalog::Product;

    fn product(price: Cents, quantity: u32, active: bool) -> Product {
        Product {
            id: ProductId::new(),
            name: format!("Pump {price}"),
            description: String::new(),
            price,
            quantity,
            active,
        }
    }

    #[test]
    fn clamps_quantity_to_stock() {
        let p1 = product(10_000, 5, true);
        let catalog = vec![p1.clone()];

        let result = validate_cart(
            &catalog,
            &[CartLine {
                product_id: p1.id,
                quantity: 10,
            }],
        );

        assert_eq!(result.valid_cart_items.len(), 1);
        assert_eq!(result.valid_cart_items[0].quantity, 5);
        assert_eq!(result.valid_cart_items[0].price, 10_000);
        assert_eq!(result.updated_items.len(), 1);
        assert_eq!(result.updated_items[0].original_quantity, 10);
        assert_eq!(result.updated_items[0].adjusted_quantity, 5);
        assert!(result.removed_items.is_empty());
        assert!(result.cart_changed);
    }

    #[test]
    fn zero_quantity_line_is_dropped() {
        let empty = product(2_000, 5, true);
        let kept = product(3_000, 5, true);
        let catalog = vec![empty.clone(), kept.clone()];

        let result = validate_cart(
            &catalog,
            &[
                CartLine {
                    product_id: empty.id,
                    quantity: 0,
                },
                CartLine {
                    product_id: kept.id,
                    quantity: 1,
                },
            ],
        );

        assert_eq!(result.valid_cart_items.len(), 1);
        assert_eq!(result.valid_cart_items[0].product_id, kept.id);
        assert!(result.valid_cart_items.iter().all(|i| i.quantity > 0));
        assert!(result.updated_items.is_empty());
        assert!(result.removed_items.is_empty());
        assert!(result.cart_changed);
    }

    #[test]
    fn removes_inactive_product() {
        let p = product(7_500, 10, false);
        let catalog = vec![p.clone()];

        let result = validate_cart(
            &catalog,
            &[CartLine {
                product_id: p.id,
                quantity: 1,
            }],
        );

        assert!(result.valid_cart_items.is_empty());
        assert_eq!(result.removed_items.len(), 1);
        assert_eq!(result.removed_items[0].reason, UnavailableReason::Inactive);
        assert!(result.cart_changed);
    }

    #[test]
    fn removes_missing_and_out_of_stock_products() {
        let empty = product(5_000, 0, true);
        let catalog = vec![empty.clone()];
        let missing = ProductId::new();

        let result = validate_cart(
            &catalog,
            &[
                CartLine {
                    product_id: missing,
                    quantity: 1,
                },
                CartLine {
                    product_id: empty.id,
                    quantity: 1,
                },
            ],
        );

        let reasons: Vec<_> = result.removed_items.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![UnavailableReason::NotFound, UnavailableReason::OutOfStock]
        );
        assert!(result.valid_cart_items.is_empty());
    }

    #[test]
    fn untouched_cart_is_not_changed() {
        let p = product(2_500, 3, true);
        let catalog = vec![p.clone()];

        let result = validate_cart(
            &catalog,
            &[CartLine {
                product_id: p.id,
                quantity: 3,
            }],
        );

        assert!(!result.cart_changed);
        assert!(result.updated_items.is_empty());
    }

    #[test]
    fn repeated_lines_are_merged_before_clamping() {
        let p = product(1_000, 4, true);
        let catalog = vec![p.clone()];
        let line = CartLine {
            product_id: p.id,
            quantity: 3,
        };

        let result = validate_cart(&catalog, &[line, line]);

        assert_eq!(result.valid_cart_items.len(), 1);
        assert_eq!(result.valid_cart_items[0].quantity, 4);
        assert_eq!(result.updated_items[0].original_quantity, 6);
    }
}
