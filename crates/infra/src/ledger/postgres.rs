//! Postgres-backed order ledger.
//!
//! The order is stored as a JSONB document next to a few indexed columns.
//! Per-order serialization uses `SELECT ... FOR UPDATE` inside a transaction
//! that stays open until the lock is committed or dropped (rolled back).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | Any other | `Storage` |
//! | Other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use storefront_core::{AggregateRoot, OrderId};
use storefront_orders::Order;

use super::{LedgerError, OrderLedger, OrderLock, check_descends};

#[derive(Debug, Clone)]
pub struct PostgresOrderLedger {
    pool: Arc<PgPool>,
}

impl PostgresOrderLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    if is_unique_violation(&err) {
        return LedgerError::Duplicate(format!("unique violation in {operation}"));
    }
    match err {
        sqlx::Error::Database(db_err) => {
            LedgerError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => LedgerError::Storage(format!("pool closed in {operation}")),
        other => LedgerError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn to_document(order: &Order) -> Result<serde_json::Value, LedgerError> {
    serde_json::to_value(order)
        .map_err(|e| LedgerError::Storage(format!("failed to serialize order: {e}")))
}

fn from_document(document: serde_json::Value) -> Result<Order, LedgerError> {
    serde_json::from_value(document)
        .map_err(|e| LedgerError::Storage(format!("failed to deserialize order row: {e}")))
}

async fn index_reference(
    tx: &mut Transaction<'static, Postgres>,
    order: &Order,
) -> Result<(), LedgerError> {
    let Some(reference) = order.current_reference() else {
        return Ok(());
    };
    sqlx::query(
        r#"
        INSERT INTO order_references (reference_id, order_id)
        VALUES ($1, $2)
        ON CONFLICT (reference_id) DO NOTHING
        "#,
    )
    .bind(&reference.id)
    .bind(order.id_typed().as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("index_reference", e))?;
    Ok(())
}

struct PostgresOrderLock {
    tx: Transaction<'static, Postgres>,
    order: Order,
}

#[async_trait]
impl OrderLock for PostgresOrderLock {
    fn order(&self) -> &Order {
        &self.order
    }

    async fn commit(self: Box<Self>, order: &Order) -> Result<(), LedgerError> {
        let PostgresOrderLock { mut tx, order: locked } = *self;
        if !check_descends(&locked, order)? {
            // Nothing applied; just release the row lock.
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                payment_status = $3,
                current_reference = $4,
                total_cents = $5,
                version = $6,
                document = $7,
                updated_at = now()
            WHERE id = $1 AND version = $8
            "#,
        )
        .bind(order.id_typed().as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.current_reference().map(|r| r.id.as_str()))
        .bind(order.total_amount() as i64)
        .bind(order.version() as i64)
        .bind(to_document(order)?)
        .bind(locked.version() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_order", e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerError::Concurrency(format!(
                "order {} is no longer at version {}",
                order.id_typed(),
                locked.version()
            )));
        }

        index_reference(&mut tx, order).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for PostgresOrderLedger {
    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert(&self, order: &Order) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, status, payment_status, current_reference,
                total_cents, version, document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id_typed().as_uuid())
        .bind(order.order_number())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.current_reference().map(|r| r.id.as_str()))
        .bind(order.total_amount() as i64)
        .bind(order.version() as i64)
        .bind(to_document(order)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        index_reference(&mut tx, order).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query("SELECT document FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?;

        row.map(|r| {
            let document: serde_json::Value = r
                .try_get("document")
                .map_err(|e| map_sqlx_error("get_order", e))?;
            from_document(document)
        })
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<OrderId>, LedgerError> {
        let row = sqlx::query("SELECT order_id FROM order_references WHERE reference_id = $1")
            .bind(reference_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_reference", e))?;

        row.map(|r| {
            r.try_get::<uuid::Uuid, _>("order_id")
                .map(OrderId::from)
                .map_err(|e| map_sqlx_error("find_by_reference", e))
        })
        .transpose()
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn lock(&self, order_id: OrderId) -> Result<Box<dyn OrderLock>, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query("SELECT document FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_order", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerError::NotFound(order_id));
        };
        let document: serde_json::Value = row
            .try_get("document")
            .map_err(|e| map_sqlx_error("lock_order", e))?;

        Ok(Box::new(PostgresOrderLock {
            tx,
            order: from_document(document)?,
        }))
    }
}
