//! Postgres-backed catalog and inventory.
//!
//! Decrements lock the affected product rows (`FOR UPDATE`) and insert the
//! order's `inventory_decrements` key in the same transaction, so a second
//! decrement for the same order finds the key and changes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use storefront_catalog::Product;
use storefront_core::{OrderId, ProductId};
use storefront_cart::merge_lines;
use storefront_inventory::{DecrementLine, DecrementOutcome, plan_decrement};

use super::{CatalogError, CatalogStore};
use crate::inventory::{InventoryEngine, InventoryError};

/// Schema applied by [`PostgresCatalog::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_storefront.sql");

#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: Arc<PgPool>,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables if they do not exist yet.
    pub async fn migrate(pool: &PgPool) -> Result<(), CatalogError> {
        sqlx::raw_sql(SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| storage("migrate", e))?;
        Ok(())
    }
}

fn storage(operation: &str, err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::Database(db_err) => {
            CatalogError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        other => CatalogError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn inventory_storage(operation: &str, err: sqlx::Error) -> InventoryError {
    match storage(operation, err) {
        CatalogError::Storage(msg) | CatalogError::Seed(msg) => InventoryError::Storage(msg),
    }
}

/// Stock levels live in an `INTEGER` column.
fn stock_column(operation: &str, quantity: u32) -> Result<i32, String> {
    i32::try_from(quantity)
        .map_err(|_| format!("{operation}: stock level {quantity} is out of range for storage"))
}

/// Prices live in a `BIGINT` column.
fn price_column(operation: &str, price: u64) -> Result<i64, String> {
    i64::try_from(price)
        .map_err(|_| format!("{operation}: price {price} is out of range for storage"))
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    let id: Uuid = row.try_get("id")?;
    let price: i64 = row.try_get("price_cents")?;
    let quantity: i32 = row.try_get("quantity")?;
    Ok(Product {
        id: ProductId::from(id),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: price.max(0) as u64,
        quantity: quantity.max(0) as u32,
        active: row.try_get("active")?,
    })
}

const SELECT_PRODUCTS: &str =
    "SELECT id, name, description, price_cents, quantity, active FROM products";

#[async_trait]
impl CatalogStore for PostgresCatalog {
    async fn get(&self, product_id: ProductId) -> Result<Option<Product>, CatalogError> {
        let row = sqlx::query(&format!("{SELECT_PRODUCTS} WHERE id = $1"))
            .bind(product_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| storage("get_product", e))?;
        row.as_ref()
            .map(product_from_row)
            .transpose()
            .map_err(|e| storage("get_product", e))
    }

    async fn snapshot(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, CatalogError> {
        let ids: Vec<Uuid> = product_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!("{SELECT_PRODUCTS} WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| storage("snapshot", e))?;

        let mut products = HashMap::with_capacity(rows.len());
        for row in &rows {
            let product = product_from_row(row).map_err(|e| storage("snapshot", e))?;
            products.insert(product.id, product);
        }
        Ok(products)
    }

    async fn list(&self) -> Result<Vec<Product>, CatalogError> {
        let rows = sqlx::query(&format!("{SELECT_PRODUCTS} ORDER BY name, id"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| storage("list_products", e))?;
        rows.iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage("list_products", e))
    }

    async fn upsert(&self, product: Product) -> Result<(), CatalogError> {
        let price = price_column("upsert_product", product.price).map_err(CatalogError::Storage)?;
        let quantity =
            stock_column("upsert_product", product.quantity).map_err(CatalogError::Storage)?;
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price_cents, quantity, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                price_cents = EXCLUDED.price_cents,
                quantity = EXCLUDED.quantity,
                active = EXCLUDED.active,
                updated_at = now()
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(price)
        .bind(quantity)
        .bind(product.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| storage("upsert_product", e))?;
        Ok(())
    }
}

#[async_trait]
impl InventoryEngine for PostgresCatalog {
    #[instrument(skip(self, lines), fields(order_id = %order_id, lines = lines.len()), err)]
    async fn decrement_for_order(
        &self,
        order_id: OrderId,
        lines: &[DecrementLine],
    ) -> Result<DecrementOutcome, InventoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| inventory_storage("begin_transaction", e))?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO inventory_decrements (order_id, report)
            VALUES ($1, '{}'::jsonb)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| inventory_storage("claim_decrement", e))?;

        if claimed.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| inventory_storage("rollback", e))?;
            return Ok(DecrementOutcome::AlreadyApplied { order_id });
        }

        let merged = merge_lines(lines.iter().copied());
        let ids: Vec<Uuid> = merged.iter().map(|l| *l.product_id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT id, quantity FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| inventory_storage("lock_products", e))?;

        let mut stock: HashMap<ProductId, u32> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| inventory_storage("lock_products", e))?;
            let quantity: i32 = row
                .try_get("quantity")
                .map_err(|e| inventory_storage("lock_products", e))?;
            stock.insert(ProductId::from(id), quantity.max(0) as u32);
        }

        let report = plan_decrement(&merged, |id| stock.get(id).copied());
        for change in &report.changes {
            let after = stock_column("update_stock", change.after).map_err(InventoryError::Storage)?;
            sqlx::query("UPDATE products SET quantity = $2, updated_at = now() WHERE id = $1")
                .bind(change.product_id.as_uuid())
                .bind(after)
                .execute(&mut *tx)
                .await
                .map_err(|e| inventory_storage("update_stock", e))?;
        }

        let report_json = serde_json::to_value(&report)
            .map_err(|e| InventoryError::Storage(format!("failed to serialize report: {e}")))?;
        sqlx::query("UPDATE inventory_decrements SET report = $2 WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .bind(report_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| inventory_storage("record_decrement", e))?;

        tx.commit()
            .await
            .map_err(|e| inventory_storage("commit", e))?;
        Ok(DecrementOutcome::Applied { order_id, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_beyond_the_column_range_is_rejected() {
        assert_eq!(stock_column("upsert_product", 42), Ok(42));
        assert_eq!(stock_column("upsert_product", i32::MAX as u32), Ok(i32::MAX));
        let err = stock_column("upsert_product", i32::MAX as u32 + 1).unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn price_beyond_the_column_range_is_rejected() {
        assert_eq!(price_column("upsert_product", 10_000), Ok(10_000));
        assert!(price_column("upsert_product", u64::MAX).is_err());
    }
}
