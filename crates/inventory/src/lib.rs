//! Inventory domain module.
//!
//! Pure stock-decrement rules: stock never goes below zero and any shortfall
//! is reported instead of failing. Atomicity and once-per-order idempotency
//! are the job of the stores in `storefront-infra`.

pub mod decrement;

pub use decrement::{
    DecrementLine, DecrementOutcome, DecrementReport, StockChange, decrement_stock, plan_decrement,
};
