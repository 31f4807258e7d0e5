//! Authoritative product store.
//!
//! The same store backs the Inventory Decrement Engine, so stock reads made
//! by the availability gate and stock writes made after payment see one
//! source of truth.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use storefront_catalog::Product;
use storefront_core::ProductId;

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryCatalog;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCatalog;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid catalog seed: {0}")]
    Seed(String),

    #[error("catalog storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get(&self, product_id: ProductId) -> Result<Option<Product>, CatalogError>;

    /// Consistent read of several products; missing ids are simply absent.
    async fn snapshot(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, CatalogError>;

    async fn list(&self) -> Result<Vec<Product>, CatalogError>;

    async fn upsert(&self, product: Product) -> Result<(), CatalogError>;
}

/// Read a JSON array of products.
pub fn load_seed(path: &Path) -> Result<Vec<Product>, CatalogError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CatalogError::Seed(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| CatalogError::Seed(format!("{}: {e}", path.display())))
}
