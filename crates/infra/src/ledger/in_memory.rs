use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use storefront_core::OrderId;
use storefront_orders::Order;

use super::{LedgerError, OrderLedger, OrderLock, check_descends};

#[derive(Debug, Default)]
struct Indexes {
    orders: HashMap<OrderId, Arc<Mutex<Order>>>,
    numbers: HashMap<String, OrderId>,
    references: HashMap<String, OrderId>,
}

/// In-memory order ledger.
///
/// Intended for tests/dev. Each order sits behind its own async mutex, so
/// writers to different orders never contend.
#[derive(Debug, Default)]
pub struct InMemoryOrderLedger {
    indexes: Arc<RwLock<Indexes>>,
}

fn poisoned() -> LedgerError {
    LedgerError::Storage("lock poisoned".to_string())
}

impl InMemoryOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, order_id: OrderId) -> Result<Arc<Mutex<Order>>, LedgerError> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        indexes
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(LedgerError::NotFound(order_id))
    }

    pub fn len(&self) -> usize {
        self.indexes.read().map(|i| i.orders.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct InMemoryOrderLock {
    guard: OwnedMutexGuard<Order>,
    indexes: Arc<RwLock<Indexes>>,
}

#[async_trait]
impl OrderLock for InMemoryOrderLock {
    fn order(&self) -> &Order {
        &self.guard
    }

    async fn commit(mut self: Box<Self>, order: &Order) -> Result<(), LedgerError> {
        if !check_descends(&self.guard, order)? {
            return Ok(());
        }

        if let Some(reference) = order.current_reference() {
            let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
            indexes
                .references
                .entry(reference.id.clone())
                .or_insert(order.id_typed());
        }
        *self.guard = order.clone();
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn insert(&self, order: &Order) -> Result<(), LedgerError> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        let order_id = order.id_typed();
        if indexes.orders.contains_key(&order_id) {
            return Err(LedgerError::Duplicate(format!("order id {order_id}")));
        }
        if indexes.numbers.contains_key(order.order_number()) {
            return Err(LedgerError::Duplicate(format!(
                "order number {}",
                order.order_number()
            )));
        }

        indexes
            .numbers
            .insert(order.order_number().to_string(), order_id);
        if let Some(reference) = order.current_reference() {
            indexes.references.insert(reference.id.clone(), order_id);
        }
        indexes
            .orders
            .insert(order_id, Arc::new(Mutex::new(order.clone())));
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, LedgerError> {
        let slot = match self.slot(order_id) {
            Ok(slot) => slot,
            Err(LedgerError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let order = slot.lock().await;
        Ok(Some(order.clone()))
    }

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<OrderId>, LedgerError> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        Ok(indexes.references.get(reference_id).copied())
    }

    async fn lock(&self, order_id: OrderId) -> Result<Box<dyn OrderLock>, LedgerError> {
        let slot = self.slot(order_id)?;
        let guard = slot.lock_owned().await;
        Ok(Box::new(InMemoryOrderLock {
            guard,
            indexes: self.indexes.clone(),
        }))
    }
}
