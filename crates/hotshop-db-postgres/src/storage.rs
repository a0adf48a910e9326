//! PostgreSQL implementation of the catalog and order stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotshop_core::{Order, OrderStatus, Shop, ShopId, ShopType, UserId, VoucherId, VoucherStock};
use hotshop_storage::{CatalogStore, OrderStore, OrderTransaction, StorageError};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::{Result, storage_error};
use crate::pool::create_pool;
use crate::transaction::PostgresOrderTransaction;

type ShopRow = (
    i64,
    String,
    i64,
    String,
    Option<String>,
    String,
    f64,
    f64,
    Option<i64>,
    i32,
    i32,
    i32,
    Option<String>,
);

pub(crate) type OrderRow = (i64, i64, i64, i16, DateTime<Utc>);

const SHOP_COLUMNS: &str =
    "id, name, type_id, images, area, address, x, y, avg_price, sold, comments, score, open_hours";

const ORDER_COLUMNS: &str = "id, user_id, voucher_id, status, create_time";

fn shop_from_row(row: ShopRow) -> Shop {
    let (id, name, type_id, images, area, address, x, y, avg_price, sold, comments, score, open_hours) =
        row;
    Shop {
        id,
        name,
        type_id,
        images,
        area,
        address,
        x,
        y,
        avg_price,
        sold,
        comments,
        score,
        open_hours,
    }
}

pub(crate) fn order_from_row(row: OrderRow) -> std::result::Result<Order, StorageError> {
    let (id, user_id, voucher_id, status, created_at) = row;
    Ok(Order {
        id,
        user_id,
        voucher_id,
        status: OrderStatus::from_code(status)?,
        created_at: from_chrono(created_at)?,
    })
}

pub(crate) fn to_chrono(at: OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(at.unix_timestamp(), at.nanosecond()).unwrap_or_default()
}

fn from_chrono(at: DateTime<Utc>) -> std::result::Result<OffsetDateTime, StorageError> {
    let nanos = i128::from(at.timestamp()) * 1_000_000_000 + i128::from(at.timestamp_subsec_nanos());
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|e| StorageError::invalid_data(format!("timestamp out of range: {e}")))
}

/// PostgreSQL-backed system of record.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connects a pool and runs migrations when configured.
    pub async fn new(config: &PostgresConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        if config.run_migrations {
            crate::migrations::run(&pool).await?;
        }
        info!("PostgreSQL storage ready");
        Ok(Self { pool })
    }

    /// Wraps an existing pool. Migrations are not run.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts or replaces a shop.
    pub async fn upsert_shop(&self, shop: &Shop) -> std::result::Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO tb_shop ({SHOP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, type_id = EXCLUDED.type_id, \
             images = EXCLUDED.images, area = EXCLUDED.area, address = EXCLUDED.address, \
             x = EXCLUDED.x, y = EXCLUDED.y, avg_price = EXCLUDED.avg_price, sold = EXCLUDED.sold, \
             comments = EXCLUDED.comments, score = EXCLUDED.score, open_hours = EXCLUDED.open_hours, \
             update_time = now()"
        );
        bind_shop(query(&sql), shop)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    /// Inserts or replaces a shop type.
    pub async fn upsert_shop_type(&self, shop_type: &ShopType) -> std::result::Result<(), StorageError> {
        query(
            "INSERT INTO tb_shop_type (id, name, icon, sort) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, icon = EXCLUDED.icon, \
             sort = EXCLUDED.sort, update_time = now()",
        )
        .bind(shop_type.id)
        .bind(&shop_type.name)
        .bind(&shop_type.icon)
        .bind(shop_type.sort)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    /// Sets the authoritative stock of a voucher.
    pub async fn set_stock(&self, voucher_id: VoucherId, stock: i32) -> std::result::Result<(), StorageError> {
        query(
            "INSERT INTO tb_seckill_voucher (voucher_id, stock) VALUES ($1, $2) \
             ON CONFLICT (voucher_id) DO UPDATE SET stock = EXCLUDED.stock, update_time = now()",
        )
        .bind(voucher_id)
        .bind(stock)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}

fn bind_shop<'q>(
    q: sqlx_core::query::Query<'q, sqlx_postgres::Postgres, sqlx_postgres::PgArguments>,
    shop: &'q Shop,
) -> sqlx_core::query::Query<'q, sqlx_postgres::Postgres, sqlx_postgres::PgArguments> {
    q.bind(shop.id)
        .bind(&shop.name)
        .bind(shop.type_id)
        .bind(&shop.images)
        .bind(&shop.area)
        .bind(&shop.address)
        .bind(shop.x)
        .bind(shop.y)
        .bind(shop.avg_price)
        .bind(shop.sold)
        .bind(shop.comments)
        .bind(shop.score)
        .bind(&shop.open_hours)
}

#[async_trait]
impl CatalogStore for PostgresStorage {
    #[instrument(skip(self))]
    async fn get_shop(&self, id: ShopId) -> std::result::Result<Option<Shop>, StorageError> {
        let sql = format!("SELECT {SHOP_COLUMNS} FROM tb_shop WHERE id = $1");
        let row: Option<ShopRow> = query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        debug!(found = row.is_some(), "shop read");
        Ok(row.map(shop_from_row))
    }

    #[instrument(skip(self, shop), fields(shop_id = shop.id))]
    async fn update_shop(&self, shop: &Shop) -> std::result::Result<bool, StorageError> {
        let update = query(
            "UPDATE tb_shop SET name = $2, type_id = $3, images = $4, area = $5, address = $6, \
             x = $7, y = $8, avg_price = $9, sold = $10, comments = $11, score = $12, \
             open_hours = $13, update_time = now() WHERE id = $1",
        );
        let result = bind_shop(update, shop)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_shop_types(&self) -> std::result::Result<Vec<ShopType>, StorageError> {
        let rows: Vec<(i64, String, String, i32)> =
            query_as("SELECT id, name, icon, sort FROM tb_shop_type ORDER BY sort, id")
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, icon, sort)| ShopType {
                id,
                name,
                icon,
                sort,
            })
            .collect())
    }

    async fn get_voucher_stock(
        &self,
        voucher_id: VoucherId,
    ) -> std::result::Result<Option<VoucherStock>, StorageError> {
        let row: Option<(i64, i32)> =
            query_as("SELECT voucher_id, stock FROM tb_seckill_voucher WHERE voucher_id = $1")
                .bind(voucher_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(row.map(|(voucher_id, stock)| VoucherStock { voucher_id, stock }))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl OrderStore for PostgresStorage {
    async fn begin_order_transaction(
        &self,
    ) -> std::result::Result<Box<dyn OrderTransaction>, StorageError> {
        let tx = self.pool.begin().await.map_err(storage_error)?;
        Ok(Box::new(PostgresOrderTransaction::new(tx)))
    }

    async fn find_order(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> std::result::Result<Option<Order>, StorageError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2"
        );
        let row: Option<OrderRow> = query_as(&sql)
            .bind(user_id)
            .bind(voucher_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.map(order_from_row).transpose()
    }

    async fn list_orders(&self, voucher_id: VoucherId) -> std::result::Result<Vec<Order>, StorageError> {
        let sql =
            format!("SELECT {ORDER_COLUMNS} FROM tb_voucher_order WHERE voucher_id = $1 ORDER BY id");
        let rows: Vec<OrderRow> = query_as(&sql)
            .bind(voucher_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.into_iter().map(order_from_row).collect()
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion() {
        let now = hotshop_core::now_utc();
        let back = from_chrono(to_chrono(now)).unwrap();
        assert_eq!(back.unix_timestamp_nanos(), now.unix_timestamp_nanos());
    }

    #[test]
    fn test_order_row_mapping() {
        let at = Utc::now();
        let order = order_from_row((7, 1, 2, 1, at)).unwrap();
        assert_eq!(order.status, OrderStatus::Unpaid);
        assert!(order_from_row((7, 1, 2, 42, at)).is_err());
    }

    #[tokio::test]
    async fn test_begin_against_unreachable_server_is_retryable() {
        let pool = crate::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://shop:pw@127.0.0.1:1/hotshop")
            .unwrap();
        let storage = PostgresStorage::from_pool(pool);
        let err = storage.begin_order_transaction().await.err().unwrap();
        assert!(err.is_retryable(), "{err}");
    }
}
