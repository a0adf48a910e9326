//! Shop catalog served through the cache.
//!
//! Reads go through [`CacheClient`] with the configured strategy; writes go
//! to the system of record first and then drop the cached entry.

use std::sync::Arc;
use std::time::Duration;

use hotshop_cache::{CacheClient, CacheError, CacheStrategy};
use hotshop_core::{CoreError, Shop, ShopId, ShopType};
use hotshop_storage::{DynCatalogStore, StorageError};
use tracing::{info, instrument};

use crate::config::CatalogConfig;

pub const SHOP_KEY_PREFIX: &str = "cache:shop:";
pub const SHOP_TYPE_KEY: &str = "cache:shop-type";

pub fn shop_key(id: ShopId) -> String {
    format!("{SHOP_KEY_PREFIX}{id}")
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid shop: {0}")]
    Invalid(#[from] CoreError),

    #[error("Shop {0} not found")]
    NotFound(ShopId),
}

impl CatalogError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cache(e) => e.is_retryable(),
            Self::Storage(e) => e.is_retryable(),
            Self::Invalid(_) | Self::NotFound(_) => false,
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Clone)]
pub struct ShopService {
    cache: Arc<CacheClient>,
    catalog: DynCatalogStore,
    shop_ttl: Duration,
    shop_type_ttl: Duration,
}

impl ShopService {
    pub fn new(cache: Arc<CacheClient>, catalog: DynCatalogStore, config: &CatalogConfig) -> Self {
        Self {
            cache,
            catalog,
            shop_ttl: config.shop_ttl(),
            shop_type_ttl: config.shop_type_ttl(),
        }
    }

    /// Reads a shop with the cache's configured strategy.
    ///
    /// Under logical expiry an un-warmed shop reads as `None`.
    #[instrument(skip(self))]
    pub async fn get_shop(&self, id: ShopId) -> CatalogResult<Option<Shop>> {
        let catalog = self.catalog.clone();
        let shop = self
            .cache
            .get(&shop_key(id), self.shop_ttl, move || async move {
                catalog.get_shop(id).await
            })
            .await?;
        Ok(shop)
    }

    /// Writes the shop to the system of record, then invalidates its entry.
    ///
    /// Under logical expiry the entry is rewritten instead: that strategy
    /// never loads absent keys, so a deleted entry would read as missing.
    #[instrument(skip(self, shop), fields(shop_id = shop.id))]
    pub async fn update_shop(&self, shop: &Shop) -> CatalogResult<()> {
        shop.validate()?;
        if !self.catalog.update_shop(shop).await? {
            return Err(CatalogError::NotFound(shop.id));
        }
        let key = shop_key(shop.id);
        match self.cache.strategy() {
            CacheStrategy::LogicalExpire => {
                self.cache
                    .set_with_logical_expire(&key, shop, self.shop_ttl)
                    .await?
            }
            CacheStrategy::PassThrough | CacheStrategy::Mutex => {
                self.cache.invalidate(&key).await?;
            }
        }
        Ok(())
    }

    /// Writes a logical-expiry entry for a shop. Returns `false` if the shop
    /// does not exist.
    pub async fn warm_shop(&self, id: ShopId, ttl: Duration) -> CatalogResult<bool> {
        let Some(shop) = self.catalog.get_shop(id).await? else {
            return Ok(false);
        };
        self.cache
            .set_with_logical_expire(&shop_key(id), &shop, ttl)
            .await?;
        info!(shop_id = id, ttl_secs = ttl.as_secs(), "shop pre-warmed");
        Ok(true)
    }

    /// Shop types ordered by `sort`, served from the list cache.
    pub async fn list_shop_types(&self) -> CatalogResult<Vec<ShopType>> {
        let catalog = self.catalog.clone();
        let types = self
            .cache
            .get_list(SHOP_TYPE_KEY, self.shop_type_ttl, || async move {
                catalog.list_shop_types().await
            })
            .await?;
        Ok(types)
    }
}

impl std::fmt::Debug for ShopService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopService")
            .field("strategy", &self.cache.strategy())
            .field("catalog", &self.catalog.backend_name())
            .field("shop_ttl", &self.shop_ttl)
            .finish()
    }
}
