use serde::{Deserialize, Serialize};

use storefront_catalog::{Availability, AvailabilityIssue, IssueKind, ProductLookup};
use storefront_core::{Cents, ProductId, TaxRate};

use crate::{ProductLine, merge_lines};

/// A line submitted for quoting; `price` is what the client believes it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<Cents>,
}

impl ProductLine for QuoteLine {
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Cents,
    pub line_total: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuoteIssues {
    pub unavailable_items: Vec<AvailabilityIssue>,
    pub quantity_issues: Vec<AvailabilityIssue>,
    pub price_issues: Vec<AvailabilityIssue>,
}

/// Authoritative totals for a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub valid: bool,
    pub subtotal: Cents,
    pub tax_amount: Cents,
    pub total_amount: Cents,
    pub tax_rate: TaxRate,
    pub valid_items: Vec<QuotedItem>,
    pub issues: QuoteIssues,
}

impl Quote {
    /// Unavailable items and quantity problems block checkout; price drift
    /// is only a warning because the current price is used anyway.
    pub fn is_blocking(&self) -> bool {
        !self.issues.unavailable_items.is_empty() || !self.issues.quantity_issues.is_empty()
    }
}

/// Compute totals from authoritative prices.
///
/// Only lines that pass availability and quantity checks count toward the
/// totals. A price mismatch is reported but the line is still priced at the
/// catalog price.
pub fn calculate_order_total<L>(lookup: &L, lines: &[QuoteLine], tax_rate: TaxRate) -> Quote
where
    L: ProductLookup + ?Sized,
{
    let lines = merge_lines(lines.iter().copied());

    let mut issues = QuoteIssues::default();
    let mut valid_items = Vec::with_capacity(lines.len());
    let mut subtotal: Cents = 0;

    for line in lines {
        let Some(product) = lookup.product(&line.product_id) else {
            issues
                .unavailable_items
                .push(AvailabilityIssue::new(line.product_id, None, IssueKind::NotFound));
            continue;
        };

        let (price, on_hand) = match product.availability() {
            Availability::Unavailable(reason) => {
                issues.unavailable_items.push(AvailabilityIssue::new(
                    line.product_id,
                    Some(product),
                    reason.into(),
                ));
                continue;
            }
            Availability::Available { price, quantity } => (price, quantity),
        };

        if line.quantity == 0 || line.quantity > on_hand {
            issues.quantity_issues.push(AvailabilityIssue::new(
                line.product_id,
                Some(product),
                IssueKind::InsufficientQuantity {
                    requested: line.quantity,
                    available: on_hand,
                },
            ));
            continue;
        }

        if let Some(submitted) = line.price {
            if submitted != price {
                issues.price_issues.push(AvailabilityIssue::new(
                    line.product_id,
                    Some(product),
                    IssueKind::PriceChanged {
                        submitted,
                        current: price,
                    },
                ));
            }
        }

        // The grand total, tax included, must stay representable.
        let priced = price.checked_mul(Cents::from(line.quantity)).and_then(|line_total| {
            let next = subtotal.checked_add(line_total)?;
            next.checked_add(tax_rate.tax_on(next))?;
            Some((line_total, next))
        });
        let Some((line_total, next_subtotal)) = priced else {
            issues.quantity_issues.push(AvailabilityIssue::new(
                line.product_id,
                Some(product),
                IssueKind::TotalOverflow {
                    requested: line.quantity,
                },
            ));
            continue;
        };
        subtotal = next_subtotal;

        valid_items.push(QuotedItem {
            product_id: line.product_id,
            name: product.name.clone(),
            quantity: line.quantity,
            unit_price: price,
            line_total,
        });
    }

    let tax_amount = tax_rate.tax_on(subtotal);

    let mut quote = Quote {
        valid: false,
        subtotal,
        tax_amount,
        total_amount: subtotal + tax_amount,
        tax_rate,
        valid_items,
        issues,
    };
    quote.valid = !quote.is_blocking();
    quote
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_catalog::Product;

    fn rate() -> TaxRate {
        TaxRate::from_bps(1300).unwrap()
    }

    fn product(price: Cents, quantity: u32, active: bool) -> Product {
        Product {
            id: ProductId::new(),
            name: "Gear pump".to_string(),
            description: String::new(),
            price,
            quantity,
            active,
        }
    }

    #[test]
    fn totals_for_single_available_item() {
        let p = product(10_000, 10, true);
        let catalog = vec![p.clone()];

        let quote = calculate_order_total(
            &catalog,
            &[QuoteLine {
                product_id: p.id,
                quantity: 2,
                price: Some(10_000),
            }],
            rate(),
        );

        assert!(quote.valid);
        assert_eq!(quote.subtotal, 20_000);
        assert_eq!(quote.tax_amount, 2_600);
        assert_eq!(quote.total_amount, 22_600);
        assert_eq!(quote.valid_items.len(), 1);
    }

    #[test]
    fn price_mismatch_is_a_warning_priced_at_catalog() {
        let p = product(10_000, 10, true);
        let catalog = vec![p.clone()];

        let quote = calculate_order_total(
            &catalog,
            &[QuoteLine {
                product_id: p.id,
                quantity: 1,
                price: Some(9_000),
            }],
            rate(),
        );

        assert!(quote.valid);
        assert!(!quote.is_blocking());
        assert_eq!(quote.issues.price_issues.len(), 1);
        assert_eq!(quote.subtotal, 10_000);
    }

    #[test]
    fn unavailable_and_short_items_block_and_are_excluded() {
        let ok = product(1_000, 10, true);
        let inactive = product(2_000, 10, false);
        let short = product(3_000, 1, true);
        let catalog = vec![ok.clone(), inactive.clone(), short.clone()];

        let quote = calculate_order_total(
            &catalog,
            &[
                QuoteLine {
                    product_id: ok.id,
                    quantity: 1,
                    price: None,
                },
                QuoteLine {
                    product_id: inactive.id,
                    quantity: 1,
                    price: None,
                },
                QuoteLine {
                    product_id: short.id,
                    quantity: 2,
                    price: None,
                },
            ],
            rate(),
        );

        assert!(!quote.valid);
        assert!(quote.is_blocking());
        assert_eq!(quote.issues.unavailable_items.len(), 1);
        assert_eq!(quote.issues.quantity_issues.len(), 1);
        assert_eq!(quote.subtotal, 1_000);
        assert_eq!(quote.tax_amount, 130);
    }

    #[test]
    fn unpriceable_line_blocks_instead_of_wrapping() {
        let cheap = product(1_000, 10, true);
        let huge = product(u64::MAX / 2, 10, true);
        let catalog = vec![cheap.clone(), huge.clone()];

        let quote = calculate_order_total(
            &catalog,
            &[
                QuoteLine {
                    product_id: cheap.id,
                    quantity: 1,
                    price: None,
                },
                QuoteLine {
                    product_id: huge.id,
                    quantity: 3,
                    price: None,
                },
            ],
            rate(),
        );

        assert!(!quote.valid);
        assert_eq!(quote.issues.quantity_issues.len(), 1);
        assert_eq!(quote.issues.quantity_issues[0].reason(), "total_overflow");
        assert_eq!(quote.issues.quantity_issues[0].product_id, huge.id);
        assert_eq!(quote.valid_items.len(), 1);
        assert_eq!(quote.subtotal, 1_000);
        assert_eq!(quote.total_amount, 1_130);
    }

    #[test]
    fn issues_serialize_with_reason_codes() {
        let missing = ProductId::new();
        let quote = calculate_order_total(
            &Vec::<Product>::new(),
            &[QuoteLine {
                product_id: missing,
                quantity: 1,
                price: None,
            }],
            rate(),
        );
        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["issues"]["unavailable_items"][0]["reason"], "not_found");
        assert_eq!(json["tax_rate"], 1300);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: subtotal + tax == total, and subtotal is the sum of
            /// authoritative line totals regardless of client prices.
            #[test]
            fn totals_are_consistent(
                specs in proptest::collection::vec((1u64..1_000_000, 0u32..50, any::<bool>(), 1u32..60, proptest::option::of(1u64..1_000_000)), 0..8),
                bps in 0u32..=10_000,
            ) {
                let mut catalog = Vec::new();
                let mut lines = Vec::new();
                for (price, qty, active, want, client_price) in specs {
                    let p = product(price, qty, active);
                    lines.push(QuoteLine { product_id: p.id, quantity: want, price: client_price });
                    catalog.push(p);
                }
                let rate = TaxRate::from_bps(bps).unwrap();

                let quote = calculate_order_total(&catalog, &lines, rate);

                prop_assert_eq!(quote.subtotal + quote.tax_amount, quote.total_amount);
                let expected: Cents = quote
                    .valid_items
                    .iter()
                    .map(|i| {
                        let p = catalog.iter().find(|p| p.id == i.product_id).unwrap();
                        p.price * Cents::from(i.quantity)
                    })
                    .sum();
                prop_assert_eq!(quote.subtotal, expected);
                prop_assert_eq!(quote.valid, !quote.is_blocking());
            }
        }
    }
}
