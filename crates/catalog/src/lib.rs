//! Catalog domain module.
//!
//! Read-only view of sellable products and the availability gate shared by
//! cart validation, quoting and payment-reference creation. Pure domain logic
//! (no IO, no HTTP, no storage).

pub mod gate;
pub mod product;

pub use gate::{AvailabilityIssue, IssueKind, ProductLookup, verify_purchase};
pub use product::{Availability, Product, UnavailableReason};
