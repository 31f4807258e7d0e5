//! Service-level error taxonomy.
//!
//! Every fallible checkout operation returns [`CheckoutError`]. Lower layers
//! keep their own error enums; the `From` impls below are the single place
//! where they are folded into the categories callers act on.
//!
//! | Variant | Meaning | HTTP |
//! |---------|---------|------|
//! | `Validation` | malformed client input | 400 |
//! | `NotFound` | unknown order or product | 404 |
//! | `Availability` | stale price/quantity or unsellable product at reference creation | 400 |
//! | `Processor` | external processor failed or timed out | 502 |
//! | `Conflict` | the order's state does not allow the request | 409 |
//! | `Storage` | ledger/catalog/inventory backend failure | 500 |

use thiserror::Error;

use storefront_catalog::AvailabilityIssue;
use storefront_core::DomainError;
use storefront_payments::ProcessorError;

use crate::catalog::CatalogError;
use crate::inventory::InventoryError;
use crate::ledger::LedgerError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{} item(s) are unavailable or changed", .0.len())]
    Availability(Vec<AvailabilityIssue>),

    #[error(transparent)]
    Processor(ProcessorError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CheckoutError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::Validation(_) => "validation_error",
            CheckoutError::NotFound(_) => "not_found",
            CheckoutError::Availability(_) => "availability_error",
            CheckoutError::Processor(_) => "processor_error",
            CheckoutError::Conflict(_) => "conflict",
            CheckoutError::Storage(_) => "storage_error",
        }
    }
}

impl From<DomainError> for CheckoutError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => CheckoutError::Validation(msg),
            DomainError::InvalidId(msg) => CheckoutError::Validation(msg),
            DomainError::InvariantViolation(msg) => CheckoutError::Validation(msg),
            DomainError::Conflict(msg) => CheckoutError::Conflict(msg),
            DomainError::NotFound => CheckoutError::NotFound("order".to_string()),
        }
    }
}

impl From<LedgerError> for CheckoutError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound(order_id) => CheckoutError::NotFound(format!("order {order_id}")),
            LedgerError::Duplicate(msg) | LedgerError::Concurrency(msg) => {
                CheckoutError::Conflict(msg)
            }
            LedgerError::Storage(msg) => CheckoutError::Storage(msg),
        }
    }
}

impl From<CatalogError> for CheckoutError {
    fn from(value: CatalogError) -> Self {
        CheckoutError::Storage(value.to_string())
    }
}

impl From<InventoryError> for CheckoutError {
    fn from(value: InventoryError) -> Self {
        CheckoutError::Storage(value.to_string())
    }
}

impl From<ProcessorError> for CheckoutError {
    fn from(value: ProcessorError) -> Self {
        match value {
            ProcessorError::Webhook(e) => CheckoutError::Validation(e.to_string()),
            other => CheckoutError::Processor(other),
        }
    }
}
