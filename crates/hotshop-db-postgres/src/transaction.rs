//! PostgreSQL order transaction.

use async_trait::async_trait;
use hotshop_core::{Order, UserId, VoucherId};
use hotshop_storage::{OrderTransaction, StorageError};
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgTransaction;
use tokio::sync::Mutex;

use crate::error::{is_unique_violation, storage_error};
use crate::storage::to_chrono;

/// Wraps an sqlx transaction for one order creation.
///
/// sqlx needs mutable access for every statement, so the transaction sits
/// behind a mutex; the `Option` lets commit and rollback take ownership.
/// A transaction dropped without commit is rolled back by sqlx.
pub struct PostgresOrderTransaction {
    tx: Mutex<Option<Box<PgTransaction<'static>>>>,
}

impl PostgresOrderTransaction {
    pub fn new(tx: PgTransaction<'static>) -> Self {
        Self {
            tx: Mutex::new(Some(Box::new(tx))),
        }
    }
}

fn completed() -> StorageError {
    StorageError::transaction_error("Transaction already completed (committed or rolled back)")
}

#[async_trait]
impl OrderTransaction for PostgresOrderTransaction {
    async fn order_exists(
        &mut self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<bool, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_deref_mut().ok_or_else(completed)?;
        let exists: bool = query_scalar(
            "SELECT EXISTS (SELECT 1 FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2)",
        )
        .bind(user_id)
        .bind(voucher_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage_error)?;
        Ok(exists)
    }

    async fn decrement_stock(&mut self, voucher_id: VoucherId) -> Result<bool, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_deref_mut().ok_or_else(completed)?;
        let result = query(
            "UPDATE tb_seckill_voucher SET stock = stock - 1, update_time = now() \
             WHERE voucher_id = $1 AND stock > 0",
        )
        .bind(voucher_id)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_deref_mut().ok_or_else(completed)?;
        query(
            "INSERT INTO tb_voucher_order (id, user_id, voucher_id, status, create_time) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.voucher_id)
        .bind(order.status.code())
        .bind(to_chrono(order.created_at))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::already_exists(
                    "voucher_order",
                    format!("user={},voucher={}", order.user_id, order.voucher_id),
                )
            } else {
                storage_error(e)
            }
        })?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await.map_err(storage_error)?;
            tracing::debug!("order transaction committed");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await.map_err(storage_error)?;
            tracing::debug!("order transaction rolled back");
        }
        Ok(())
    }
}
