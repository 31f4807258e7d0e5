//! Product availability gate.
//!
//! Every path that is about to let money change hands re-checks products
//! here: availability, requested quantity against stock, and the submitted
//! price against the authoritative one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use storefront_core::{Cents, ProductId};

use crate::product::{Availability, Product, UnavailableReason};

/// Read access to a snapshot of authoritative product data.
pub trait ProductLookup {
    fn product(&self, id: &ProductId) -> Option<&Product>;
}

impl ProductLookup for HashMap<ProductId, Product> {
    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.get(id)
    }
}

impl ProductLookup for [Product] {
    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.iter().find(|p| &p.id == id)
    }
}

impl ProductLookup for Vec<Product> {
    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.as_slice().product(id)
    }
}

/// What exactly is wrong with a line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IssueKind {
    NotFound,
    Inactive,
    OutOfStock,
    InsufficientQuantity { requested: u32, available: u32 },
    TotalOverflow { requested: u32 },
    PriceChanged { submitted: Cents, current: Cents },
    PriceMissing { current: Cents },
}

impl From<UnavailableReason> for IssueKind {
    fn from(value: UnavailableReason) -> Self {
        match value {
            UnavailableReason::NotFound => IssueKind::NotFound,
            UnavailableReason::Inactive => IssueKind::Inactive,
            UnavailableReason::OutOfStock => IssueKind::OutOfStock,
        }
    }
}

/// Itemized availability problem naming the offending product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityIssue {
    pub product_id: ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(flatten)]
    pub kind: IssueKind,
    pub message: String,
}

impl AvailabilityIssue {
    pub fn new(product_id: ProductId, product: Option<&Product>, kind: IssueKind) -> Self {
        let product_name = product.map(|p| p.name.clone());
        let label = product_name
            .as_deref()
            .map(|n| format!("\"{n}\""))
            .unwrap_or_else(|| format!("with ID {product_id}"));
        let message = match &kind {
            IssueKind::NotFound => format!("Product {label} not found"),
            IssueKind::Inactive | IssueKind::OutOfStock => {
                format!("Product {label} is no longer available")
            }
            IssueKind::InsufficientQuantity { available, .. } => {
                format!("Only {available} units of {label} are available")
            }
            IssueKind::TotalOverflow { requested } => {
                format!("{requested} units of {label} cannot be priced")
            }
            IssueKind::PriceChanged { .. } => {
                format!("Price for {label} has changed. Please refresh your cart.")
            }
            IssueKind::PriceMissing { .. } => {
                format!("Price for {label} was not provided. Please refresh your cart.")
            }
        };
        Self {
            product_id,
            product_name,
            kind,
            message,
        }
    }

    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self.kind {
            IssueKind::NotFound => "not_found",
            IssueKind::Inactive => "inactive",
            IssueKind::OutOfStock => "out_of_stock",
            IssueKind::InsufficientQuantity { .. } => "insufficient_quantity",
            IssueKind::TotalOverflow { .. } => "total_overflow",
            IssueKind::PriceChanged { .. } => "price_changed",
            IssueKind::PriceMissing { .. } => "price_missing",
        }
    }
}

impl core::fmt::Display for AvailabilityIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Strict purchase check used right before a payment reference is created.
///
/// `submitted_price` is the price the caller believes it is paying; a missing
/// price is reported as such rather than as a changed one.
pub fn verify_purchase<'a, L>(
    lookup: &'a L,
    product_id: ProductId,
    quantity: u32,
    submitted_price: Option<Cents>,
) -> Result<&'a Product, AvailabilityIssue>
where
    L: ProductLookup + ?Sized,
{
    let Some(product) = lookup.product(&product_id) else {
        return Err(AvailabilityIssue::new(product_id, None, IssueKind::NotFound));
    };

    match product.availability() {
        Availability::Unavailable(reason) => {
            Err(AvailabilityIssue::new(product_id, Some(product), reason.into()))
        }
        Availability::Available { price, quantity: on_hand } => {
            if quantity > on_hand {
                return Err(AvailabilityIssue::new(
                    product_id,
                    Some(product),
                    IssueKind::InsufficientQuantity {
                        requested: quantity,
                        available: on_hand,
                    },
                ));
            }
            match submitted_price {
                None => Err(AvailabilityIssue::new(
                    product_id,
                    Some(product),
                    IssueKind::PriceMissing { current: price },
                )),
                Some(submitted) if submitted != price => Err(AvailabilityIssue::new(
                    product_id,
                    Some(product),
                    IssueKind::PriceChanged {
                        submitted,
                        current: price,
                    },
                )),
                Some(_) => Ok(product),
            }
        }
    }
}
