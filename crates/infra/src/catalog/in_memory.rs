use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use storefront_catalog::Product;
use storefront_core::{OrderId, ProductId};
use storefront_inventory::{DecrementLine, DecrementOutcome, plan_decrement};

use super::{CatalogError, CatalogStore};
use crate::inventory::{InventoryEngine, InventoryError};

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    decremented: HashSet<OrderId>,
}

/// In-memory catalog and inventory.
///
/// Intended for tests/dev. One mutex covers products and the decremented
/// order set, which makes the once-per-order check and the stock writes a
/// single critical section.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        if let Ok(mut state) = catalog.state.lock() {
            state
                .products
                .extend(products.into_iter().map(|p| (p.id, p)));
        }
        catalog
    }

    /// Current stock of one product, if it exists.
    pub fn stock(&self, product_id: ProductId) -> Option<u32> {
        self.state
            .lock()
            .ok()?
            .products
            .get(&product_id)
            .map(|p| p.quantity)
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn get(&self, product_id: ProductId) -> Result<Option<Product>, CatalogError> {
        let state = self
            .state
            .lock()
            .map_err(|_| CatalogError::Storage("lock poisoned".to_string()))?;
        Ok(state.products.get(&product_id).cloned())
    }

    async fn snapshot(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, CatalogError> {
        let state = self
            .state
            .lock()
            .map_err(|_| CatalogError::Storage("lock poisoned".to_string()))?;
        Ok(product_ids
            .iter()
            .filter_map(|id| state.products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn list(&self) -> Result<Vec<Product>, CatalogError> {
        let state = self
            .state
            .lock()
            .map_err(|_| CatalogError::Storage("lock poisoned".to_string()))?;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(products)
    }

    async fn upsert(&self, product: Product) -> Result<(), CatalogError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CatalogError::Storage("lock poisoned".to_string()))?;
        state.products.insert(product.id, product);
        Ok(())
    }
}

#[async_trait]
impl InventoryEngine for InMemoryCatalog {
    async fn decrement_for_order(
        &self,
        order_id: OrderId,
        lines: &[DecrementLine],
    ) -> Result<DecrementOutcome, InventoryError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| InventoryError::Storage("lock poisoned".to_string()))?;

        if !state.decremented.insert(order_id) {
            return Ok(DecrementOutcome::AlreadyApplied { order_id });
        }

        let report = plan_decrement(lines, |id| state.products.get(id).map(|p| p.quantity));
        for change in &report.changes {
            if let Some(product) = state.products.get_mut(&change.product_id) {
                product.quantity = change.after;
            }
        }

        Ok(DecrementOutcome::Applied { order_id, report })
    }
}
