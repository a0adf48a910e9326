use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use hotshop_core::{Order, OrderId, Shop, ShopId, ShopType, UserId, VoucherId, VoucherStock};
use hotshop_storage::{CatalogStore, OrderStore, OrderTransaction, StorageError};
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct OrderBook {
    stock: HashMap<VoucherId, i32>,
    orders: HashMap<OrderId, Order>,
    by_user_voucher: HashMap<(UserId, VoucherId), OrderId>,
}

/// In-memory catalog and order storage.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    shops: DashMap<ShopId, Shop>,
    shop_types: RwLock<Vec<ShopType>>,
    book: Arc<Mutex<OrderBook>>,
    shop_reads: AtomicU64,
    begin_failures: SyncMutex<VecDeque<StorageError>>,
}

impl InMemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a shop.
    pub fn put_shop(&self, shop: Shop) {
        self.shops.insert(shop.id, shop);
    }

    /// Inserts or replaces a shop type.
    pub fn put_shop_type(&self, shop_type: ShopType) {
        let mut types = self.shop_types.write();
        types.retain(|t| t.id != shop_type.id);
        types.push(shop_type);
    }

    /// Sets the authoritative stock of a voucher.
    pub async fn set_stock(&self, voucher_id: VoucherId, stock: i32) {
        self.book.lock().await.stock.insert(voucher_id, stock);
    }

    /// Number of shop reads served, for observing cache effectiveness.
    pub fn shop_reads(&self) -> u64 {
        self.shop_reads.load(Ordering::SeqCst)
    }

    /// Makes the next `begin_order_transaction` fail with `err`. Queued
    /// failures are consumed one per call.
    pub fn fail_next_begin(&self, err: StorageError) {
        self.begin_failures.lock().push_back(err);
    }
}

#[async_trait]
impl CatalogStore for InMemoryStorage {
    async fn get_shop(&self, id: ShopId) -> Result<Option<Shop>, StorageError> {
        self.shop_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.shops.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_shop(&self, shop: &Shop) -> Result<bool, StorageError> {
        match self.shops.get_mut(&shop.id) {
            Some(mut entry) => {
                *entry = shop.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_shop_types(&self) -> Result<Vec<ShopType>, StorageError> {
        let mut types = self.shop_types.read().clone();
        types.sort_by_key(|t| (t.sort, t.id));
        Ok(types)
    }

    async fn get_voucher_stock(
        &self,
        voucher_id: VoucherId,
    ) -> Result<Option<VoucherStock>, StorageError> {
        let book = self.book.lock().await;
        Ok(book
            .stock
            .get(&voucher_id)
            .map(|&stock| VoucherStock { voucher_id, stock }))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

#[async_trait]
impl OrderStore for InMemoryStorage {
    async fn begin_order_transaction(&self) -> Result<Box<dyn OrderTransaction>, StorageError> {
        if let Some(err) = self.begin_failures.lock().pop_front() {
            return Err(err);
        }
        let guard = self.book.clone().lock_owned().await;
        Ok(Box::new(InMemoryOrderTransaction {
            book: guard,
            stock_taken: HashMap::new(),
            staged: Vec::new(),
        }))
    }

    async fn find_order(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<Option<Order>, StorageError> {
        let book = self.book.lock().await;
        Ok(book
            .by_user_voucher
            .get(&(user_id, voucher_id))
            .and_then(|id| book.orders.get(id))
            .cloned())
    }

    async fn list_orders(&self, voucher_id: VoucherId) -> Result<Vec<Order>, StorageError> {
        let book = self.book.lock().await;
        let mut orders: Vec<Order> = book
            .orders
            .values()
            .filter(|o| o.voucher_id == voucher_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

/// Order transaction holding exclusive access to the order book.
///
/// Writes are staged and applied on commit.
pub struct InMemoryOrderTransaction {
    book: OwnedMutexGuard<OrderBook>,
    stock_taken: HashMap<VoucherId, i32>,
    staged: Vec<Order>,
}

impl InMemoryOrderTransaction {
    fn staged_holds(&self, user_id: UserId, voucher_id: VoucherId) -> bool {
        self.staged
            .iter()
            .any(|o| o.user_id == user_id && o.voucher_id == voucher_id)
    }
}

#[async_trait]
impl OrderTransaction for InMemoryOrderTransaction {
    async fn order_exists(
        &mut self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> Result<bool, StorageError> {
        Ok(self.book.by_user_voucher.contains_key(&(user_id, voucher_id))
            || self.staged_holds(user_id, voucher_id))
    }

    async fn decrement_stock(&mut self, voucher_id: VoucherId) -> Result<bool, StorageError> {
        let Some(&stock) = self.book.stock.get(&voucher_id) else {
            return Ok(false);
        };
        let taken = self.stock_taken.entry(voucher_id).or_insert(0);
        if stock - *taken > 0 {
            *taken += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StorageError> {
        if self
            .book
            .by_user_voucher
            .contains_key(&(order.user_id, order.voucher_id))
            || self.staged_holds(order.user_id, order.voucher_id)
        {
            return Err(StorageError::already_exists(
                "voucher_order",
                format!("user={},voucher={}", order.user_id, order.voucher_id),
            ));
        }
        if self.book.orders.contains_key(&order.id) || self.staged.iter().any(|o| o.id == order.id)
        {
            return Err(StorageError::already_exists(
                "voucher_order",
                order.id.to_string(),
            ));
        }
        self.staged.push(order.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let InMemoryOrderTransaction {
            mut book,
            stock_taken,
            staged,
        } = *self;
        for (voucher_id, taken) in stock_taken {
            if let Some(stock) = book.stock.get_mut(&voucher_id) {
                *stock -= taken;
            }
        }
        for order in staged {
            book.by_user_voucher
                .insert((order.user_id, order.voucher_id), order.id);
            book.orders.insert(order.id, order);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
