//! System-of-record traits.

use async_trait::async_trait;
use hotshop_core::{Order, Shop, ShopId, ShopType, UserId, VoucherId, VoucherStock};

use crate::error::StorageError;

/// Catalog reads and writes.
///
/// Reads are served through the cache; implementations are only hit on
/// cache misses and refreshes.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Reads a shop by id.
    ///
    /// Returns `Ok(None)` if the shop does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::ConnectionError` if the backend is unreachable.
    async fn get_shop(&self, id: ShopId) -> Result<Option<Shop>, StorageError>;

    /// Overwrites an existing shop.
    ///
    /// Returns `Ok(false)` if no shop with this id exists.
    async fn update_shop(&self, shop: &Shop) -> Result<bool, StorageError>;

    /// Lists all shop types ordered by `sort`.
    async fn list_shop_types(&self) -> Result<Vec<ShopType>, StorageError>;

    /// Reads the authoritative stock of a flash-sale voucher.
    async fn get_voucher_stock(
        &self,
        voucher_id: VoucherId,
    ) -> Result<Option<VoucherStock>, StorageError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Begins a transaction for creating one order.
    ///
    /// Transactions touching the same voucher are isolated from each other:
    /// an existence check followed by an insert inside one transaction is
    /// never interleaved with a conflicting insert.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if a transaction cannot be
    /// started.
    async fn begin_order_transaction(&self) -> Result<Box<dyn OrderTransaction>, StorageError>;

    /// Reads the order a user holds for a voucher, if any.
    async fn find_order(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<Option<Order>, StorageError>;

    /// Lists the orders of a voucher.
    async fn list_orders(&self, voucher_id: VoucherId) -> Result<Vec<Order>, StorageError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A unit of work creating one order.
///
/// Writes are invisible to other callers until [`OrderTransaction::commit`].
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait OrderTransaction: Send + Sync {
    /// Returns `true` if the user already holds an order for the voucher.
    async fn order_exists(
        &mut self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<bool, StorageError>;

    /// Decrements the voucher stock by one if it is positive.
    ///
    /// Returns `Ok(false)` when the stock is exhausted or the voucher is
    /// unknown.
    async fn decrement_stock(&mut self, voucher_id: VoucherId) -> Result<bool, StorageError>;

    /// Inserts a new order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the user already holds an
    /// order for the voucher or the order id is taken.
    async fn insert_order(&mut self, order: &Order) -> Result<(), StorageError>;

    /// Commits all writes of this transaction.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discards all writes of this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
