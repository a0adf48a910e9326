//! Wires the stores, cache, catalog facade and flash-sale pipeline from
//! configuration, and seeds store-resident state at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hotshop_cache::CacheClient;
use hotshop_core::{ShopId, VoucherId};
use hotshop_db_memory::InMemoryStorage;
use hotshop_db_postgres::PostgresStorage;
use hotshop_kv::DynKvStore;
use hotshop_seckill::{
    ConsumerHandle, InventoryAdmission, OrderConsumer, OrderQueue, SeckillService, StoreOrderQueue,
};
use hotshop_storage::{DynCatalogStore, DynOrderStore};
use tracing::{info, warn};

use crate::catalog::ShopService;
use crate::config::{AppConfig, StorageBackend};

/// Fully wired application components.
pub struct App {
    pub config: AppConfig,
    pub store: DynKvStore,
    pub cache: Arc<CacheClient>,
    pub catalog: DynCatalogStore,
    pub orders: DynOrderStore,
    pub shops: ShopService,
    pub seckill: SeckillService,
    pub consumer: Arc<OrderConsumer>,
}

impl App {
    /// Connects the configured backends and wires the components.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store = hotshop_kv::create_kv_store(&config.redis)
            .await
            .context("failed to connect key-value store")?;

        let (catalog, orders): (DynCatalogStore, DynOrderStore) = match config.storage.backend {
            StorageBackend::Postgres => {
                let storage = Arc::new(
                    PostgresStorage::new(&config.storage.postgres)
                        .await
                        .context("failed to initialize PostgreSQL storage")?,
                );
                let catalog: DynCatalogStore = storage.clone();
                let orders: DynOrderStore = storage;
                (catalog, orders)
            }
            StorageBackend::Memory => {
                warn!("Using in-memory system of record; data is lost on restart");
                let storage = Arc::new(InMemoryStorage::new());
                let catalog: DynCatalogStore = storage.clone();
                let orders: DynOrderStore = storage;
                (catalog, orders)
            }
        };

        Ok(Self::with_backends(config, store, catalog, orders))
    }

    /// Wires the components over already constructed backends. Must run
    /// inside a Tokio runtime (the cache starts its refresh workers).
    pub fn with_backends(
        config: AppConfig,
        store: DynKvStore,
        catalog: DynCatalogStore,
        orders: DynOrderStore,
    ) -> Self {
        let cache = Arc::new(CacheClient::new(store.clone(), config.cache.clone()));
        let shops = ShopService::new(cache.clone(), catalog.clone(), &config.catalog);

        let queue: Arc<dyn OrderQueue> =
            Arc::new(StoreOrderQueue::new(store.clone(), config.seckill.queue_name.clone()));
        let admission = InventoryAdmission::new(store.clone(), config.seckill.id_prefix.clone())
            .with_retry(config.cache.retry);
        let seckill = SeckillService::new(admission, queue.clone())
            .with_compensation(config.seckill.compensate_on_publish_failure);
        let consumer = Arc::new(
            OrderConsumer::new(orders.clone(), queue)
                .with_receive_timeout(config.seckill.receive_timeout()),
        );

        info!(
            store = store.backend_name(),
            catalog = catalog.backend_name(),
            orders = orders.backend_name(),
            strategy = %cache.strategy(),
            "application wired"
        );

        Self {
            config,
            store,
            cache,
            catalog,
            orders,
            shops,
            seckill,
            consumer,
        }
    }

    /// Seeds admission stock and pre-warms shops listed in the configuration.
    pub async fn seed(&self) -> anyhow::Result<()> {
        preload_stock(
            self.seckill.admission(),
            &self.catalog,
            &self.config.seckill.preload_vouchers,
        )
        .await?;
        warm_shops(
            &self.shops,
            &self.config.catalog.warm_shops,
            self.config.catalog.shop_ttl(),
        )
        .await?;
        Ok(())
    }

    /// Starts the configured number of order consumer workers.
    pub async fn start_consumer(&self) -> anyhow::Result<ConsumerHandle> {
        let handle = self
            .consumer
            .clone()
            .start(self.config.seckill.consumer_workers)
            .await
            .context("failed to start order consumer")?;
        Ok(handle)
    }

    /// Stops the consumer, then the cache refresher.
    pub async fn shutdown(&self, consumer: ConsumerHandle) {
        consumer.shutdown().await;
        self.cache.shutdown().await;
        info!("application stopped");
    }
}

/// Copies authoritative stock into the admission state for vouchers that
/// have none yet. Returns how many vouchers were seeded.
pub async fn preload_stock(
    admission: &InventoryAdmission,
    catalog: &DynCatalogStore,
    vouchers: &[VoucherId],
) -> anyhow::Result<usize> {
    let mut seeded = 0;
    for &voucher_id in vouchers {
        let Some(stock) = catalog
            .get_voucher_stock(voucher_id)
            .await
            .with_context(|| format!("failed to read stock of voucher {voucher_id}"))?
        else {
            warn!(voucher_id, "voucher has no stock record, not preloaded");
            continue;
        };
        if admission
            .seed_stock_if_absent(voucher_id, i64::from(stock.stock))
            .await
            .with_context(|| format!("failed to seed admission stock of voucher {voucher_id}"))?
        {
            info!(voucher_id, stock = stock.stock, "admission stock preloaded");
            seeded += 1;
        } else {
            info!(voucher_id, "admission stock already present");
        }
    }
    Ok(seeded)
}

/// Writes logical-expiry entries for hot shops. Returns how many were warmed.
pub async fn warm_shops(
    shops: &ShopService,
    ids: &[ShopId],
    ttl: Duration,
) -> anyhow::Result<usize> {
    let mut warmed = 0;
    for &id in ids {
        if shops
            .warm_shop(id, ttl)
            .await
            .with_context(|| format!("failed to warm shop {id}"))?
        {
            warmed += 1;
        } else {
            warn!(shop_id = id, "shop not found, not warmed");
        }
    }
    Ok(warmed)
}
